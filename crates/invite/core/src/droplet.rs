//! Droplet rounds: fixed-size batches of water codes released round by round.
//!
//! [`plan_top_up`] decides which `(round, droplet_index)` slots may be filled
//! from the current assignments alone; [`RoundScheduler`] commits that plan
//! through the store as one unit.

use crate::model::DropletCode;
use crate::store::{InviteStorage, StoreError};
use crate::supply::SupplyManager;
use crate::InviteResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shape and timing of droplet rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletLayout {
    pub droplet_count: u32,
    pub codes_per_droplet: u32,
    /// Minimum age of a round's newest code before the next round may start.
    pub dwell: Duration,
    /// Rounds beyond this count are never created. `None` keeps advancing.
    pub max_rounds: Option<u32>,
}

impl DropletLayout {
    pub fn new(droplet_count: u32, codes_per_droplet: u32, dwell: Duration) -> Self {
        Self {
            droplet_count,
            codes_per_droplet,
            dwell,
            max_rounds: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    /// Codes consumed by one complete round.
    pub fn codes_per_round(&self) -> u64 {
        u64::from(self.droplet_count) * u64::from(self.codes_per_droplet)
    }
}

/// One slot the scheduler wants to fill, with the count it was planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFill {
    pub round: u32,
    pub droplet_index: u32,
    pub existing: u32,
    pub missing: u32,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    len: u32,
    newest: DateTime<Utc>,
}

/// Slots to fill given the current assignments.
///
/// Round 0 is completed before anything else. After that each droplet index
/// advances on its own: the target is its lowest incomplete round, which is
/// eligible once the previous round's slot is full and its newest code is at
/// least `dwell` old at `now`.
pub fn plan_top_up(
    existing: &[DropletCode],
    layout: &DropletLayout,
    now: DateTime<Utc>,
) -> Vec<SlotFill> {
    if layout.droplet_count == 0
        || layout.codes_per_droplet == 0
        || layout.max_rounds == Some(0)
    {
        return Vec::new();
    }

    let mut slots: BTreeMap<(u32, u32), SlotState> = BTreeMap::new();
    for row in existing {
        slots
            .entry((row.round, row.droplet_index))
            .and_modify(|slot| {
                slot.len += 1;
                slot.newest = slot.newest.max(row.created_at);
            })
            .or_insert(SlotState {
                len: 1,
                newest: row.created_at,
            });
    }
    let len_of = |round: u32, index: u32| slots.get(&(round, index)).map_or(0, |s| s.len);
    let full = layout.codes_per_droplet;

    let round_zero: Vec<SlotFill> = (0..layout.droplet_count)
        .filter_map(|index| {
            let len = len_of(0, index);
            (len < full).then_some(SlotFill {
                round: 0,
                droplet_index: index,
                existing: len,
                missing: full - len,
            })
        })
        .collect();
    if !round_zero.is_empty() {
        return round_zero;
    }

    let mut plan = Vec::new();
    for index in 0..layout.droplet_count {
        let mut target = 1;
        while len_of(target, index) >= full {
            target += 1;
        }
        if layout.max_rounds.is_some_and(|max| target >= max) {
            continue;
        }

        let Some(prior) = slots.get(&(target - 1, index)) else {
            continue;
        };
        if prior.len < full || prior.newest + layout.dwell > now {
            continue;
        }

        let len = len_of(target, index);
        plan.push(SlotFill {
            round: target,
            droplet_index: index,
            existing: len,
            missing: full - len,
        });
    }
    plan
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopUpReport {
    pub fills: Vec<SlotFill>,
    pub assigned: Vec<DropletCode>,
}

impl TopUpReport {
    pub fn is_idle(&self) -> bool {
        self.assigned.is_empty()
    }

    pub fn highest_round(&self) -> Option<u32> {
        self.fills.iter().map(|fill| fill.round).max()
    }
}

/// Applies [`plan_top_up`] against a store.
///
/// Safe to call on every tick: a pass with nothing eligible writes nothing,
/// and a pass whose plan went stale under a concurrent pass is reported idle.
/// With a [`SupplyManager`] attached, each pass first generates the water
/// codes its plan needs.
#[derive(Clone)]
pub struct RoundScheduler {
    store: Arc<dyn InviteStorage>,
    layout: DropletLayout,
    supply: Option<SupplyManager>,
}

impl RoundScheduler {
    pub fn new(store: Arc<dyn InviteStorage>, layout: DropletLayout) -> Self {
        Self {
            store,
            layout,
            supply: None,
        }
    }

    pub fn with_supply(mut self, supply: SupplyManager) -> Self {
        self.supply = Some(supply);
        self
    }

    pub fn layout(&self) -> &DropletLayout {
        &self.layout
    }

    pub async fn advance(&self) -> InviteResult<TopUpReport> {
        self.advance_at(Utc::now()).await
    }

    pub async fn advance_at(&self, now: DateTime<Utc>) -> InviteResult<TopUpReport> {
        let existing = self.store.list_droplet_codes().await?;
        let fills = plan_top_up(&existing, &self.layout, now);
        if fills.is_empty() {
            debug!(assigned = existing.len(), "no droplet slots eligible");
            return Ok(TopUpReport::default());
        }

        let needed: u64 = fills.iter().map(|fill| u64::from(fill.missing)).sum();
        if let Some(supply) = &self.supply {
            supply.ensure_unassigned_water(needed).await?;
        }

        match self.store.assign_droplet_slots(&fills, now).await {
            Ok(assigned) => {
                let report = TopUpReport { fills, assigned };
                info!(
                    slots = report.fills.len(),
                    codes = report.assigned.len(),
                    round = report.highest_round().unwrap_or_default(),
                    "droplet slots assigned"
                );
                Ok(report)
            }
            Err(StoreError::Conflict(reason)) => {
                info!(%reason, "droplet plan superseded by a concurrent pass");
                Ok(TopUpReport::default())
            }
            Err(StoreError::InsufficientPool { available, .. }) => {
                warn!(needed, available, "not enough water codes for droplet top-up");
                Err(crate::InviteError::InsufficientPool { needed, available })
            }
            Err(other) => Err(other.into()),
        }
    }
}
