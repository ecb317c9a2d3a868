//! Public views over water codes: the randomized droplet sample and the
//! cached water rotation snapshot.

use crate::model::{DropletCodeStatus, RotationEntry};
use crate::store::InviteStorage;
use crate::InviteResult;
use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of codes kept in the water rotation.
pub const DEFAULT_ROTATION_SIZE: usize = 10;

/// Default age at which the rotation is redrawn.
pub const DEFAULT_ROTATION_REFRESH_SECS: i64 = 60 * 60;

/// Count policy for the droplet sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Usually a handful, occasionally none.
    #[default]
    Standard,
    /// Always at least three when that many exist.
    Sp,
}

impl SelectionMode {
    /// `"sp"` selects [`SelectionMode::Sp`]; anything else is standard.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("sp") => SelectionMode::Sp,
            _ => SelectionMode::Standard,
        }
    }
}

/// Public summary of one droplet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletSummary {
    pub round: u32,
    pub droplet_index: u32,
    pub total_count: u64,
    pub available_count: u64,
    /// First unbound code of the droplet, if any remain.
    pub invite_code: Option<String>,
}

/// Groups slot rows into one summary per `(round, droplet_index)`.
pub fn summarize_droplets(rows: &[DropletCodeStatus]) -> Vec<DropletSummary> {
    let mut grouped: BTreeMap<(u32, u32), DropletSummary> = BTreeMap::new();
    for row in rows {
        let summary = grouped
            .entry((row.round, row.droplet_index))
            .or_insert_with(|| DropletSummary {
                round: row.round,
                droplet_index: row.droplet_index,
                total_count: 0,
                available_count: 0,
                invite_code: None,
            });
        summary.total_count += 1;
        if !row.used {
            summary.available_count += 1;
            if summary.invite_code.is_none() {
                summary.invite_code = Some(row.code.clone());
            }
        }
    }
    grouped.into_values().collect()
}

/// How many of `available` shuffled droplets to reveal.
///
/// `Sp`: between 3 and 5 when more than five exist, between 3 and `available`
/// when three to five exist, otherwise all of them.
///
/// `Standard`: with probability 0.8 between 0 and `min(3, available)`,
/// otherwise between `min(4, available)` and `min(5, available)`.
pub fn pick_count<R: Rng + ?Sized>(available: usize, mode: SelectionMode, rng: &mut R) -> usize {
    match mode {
        SelectionMode::Sp => {
            if available > 5 {
                rng.gen_range(3..=5)
            } else if available >= 3 {
                rng.gen_range(3..=available)
            } else {
                available
            }
        }
        SelectionMode::Standard => {
            if rng.gen_bool(0.8) {
                rng.gen_range(0..=available.min(3))
            } else {
                rng.gen_range(available.min(4)..=available.min(5))
            }
        }
    }
}

/// Randomized, partially hidden view of the latest droplet round.
#[derive(Clone)]
pub struct RotationSampler {
    store: Arc<dyn InviteStorage>,
}

impl RotationSampler {
    pub fn new(store: Arc<dyn InviteStorage>) -> Self {
        Self { store }
    }

    pub async fn sample(&self, mode: SelectionMode) -> InviteResult<Vec<DropletSummary>> {
        let rows = self.store.latest_round_with_status().await?;
        let mut rng = rand::thread_rng();
        Ok(sample_summaries(summarize_droplets(&rows), mode, &mut rng))
    }

    /// Same as [`RotationSampler::sample`] with a caller-supplied generator.
    pub async fn sample_with<R: Rng + Send + ?Sized>(
        &self,
        mode: SelectionMode,
        rng: &mut R,
    ) -> InviteResult<Vec<DropletSummary>> {
        let rows = self.store.latest_round_with_status().await?;
        Ok(sample_summaries(summarize_droplets(&rows), mode, rng))
    }
}

fn sample_summaries<R: Rng + ?Sized>(
    mut summaries: Vec<DropletSummary>,
    mode: SelectionMode,
    rng: &mut R,
) -> Vec<DropletSummary> {
    summaries.shuffle(rng);
    let count = pick_count(summaries.len(), mode, rng);
    summaries.truncate(count);
    summaries
}

/// Cached random draw of unbound water codes.
#[derive(Clone)]
pub struct WaterRotation {
    store: Arc<dyn InviteStorage>,
    size: usize,
    refresh: Duration,
}

impl WaterRotation {
    pub fn new(store: Arc<dyn InviteStorage>, size: usize, refresh: Duration) -> Self {
        Self {
            store,
            size,
            refresh,
        }
    }

    pub async fn current(&self) -> InviteResult<Vec<RotationEntry>> {
        self.current_at(Utc::now()).await
    }

    /// Snapshot entries, redrawn first when empty or when the oldest entry is
    /// at least `refresh` old. Concurrent callers redraw at most once.
    pub async fn current_at(&self, now: DateTime<Utc>) -> InviteResult<Vec<RotationEntry>> {
        let refresh = self
            .store
            .refresh_rotation_if_stale(self.size, self.refresh, now)
            .await?;
        if refresh.refreshed {
            info!(entries = refresh.entries.len(), "water rotation refreshed");
        } else {
            debug!(entries = refresh.entries.len(), "water rotation reused");
        }
        Ok(refresh.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn status(round: u32, index: u32, code: &str, used: bool) -> DropletCodeStatus {
        DropletCodeStatus {
            code: code.to_string(),
            round,
            droplet_index: index,
            used,
        }
    }

    #[test]
    fn summaries_expose_first_unbound_code() {
        let rows = vec![
            status(2, 1, "USED0001", true),
            status(2, 1, "FREE0001", false),
            status(2, 1, "FREE0002", false),
            status(2, 0, "USED0002", true),
        ];

        let summaries = summarize_droplets(&rows);
        assert_eq!(summaries.len(), 2);

        assert_eq!(summaries[0].droplet_index, 0);
        assert_eq!(summaries[0].total_count, 1);
        assert_eq!(summaries[0].available_count, 0);
        assert_eq!(summaries[0].invite_code, None);

        assert_eq!(summaries[1].total_count, 3);
        assert_eq!(summaries[1].available_count, 2);
        assert_eq!(summaries[1].invite_code.as_deref(), Some("FREE0001"));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(SelectionMode::from_query(Some("sp")), SelectionMode::Sp);
        assert_eq!(SelectionMode::from_query(Some("SP")), SelectionMode::Standard);
        assert_eq!(SelectionMode::from_query(None), SelectionMode::Standard);
    }

    #[test]
    fn sp_mode_boundaries() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert!((3..=5).contains(&pick_count(5, SelectionMode::Sp, &mut rng)));
            assert!((3..=5).contains(&pick_count(40, SelectionMode::Sp, &mut rng)));
            assert_eq!(pick_count(2, SelectionMode::Sp, &mut rng), 2);
            assert_eq!(pick_count(3, SelectionMode::Sp, &mut rng), 3);
        }
    }

    #[test]
    fn empty_input_reveals_nothing() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            assert_eq!(pick_count(0, SelectionMode::Sp, &mut rng), 0);
            assert_eq!(pick_count(0, SelectionMode::Standard, &mut rng), 0);
        }
        assert!(sample_summaries(Vec::new(), SelectionMode::Sp, &mut rng).is_empty());
    }

    #[test]
    fn standard_mode_hits_both_bands() {
        let mut rng = StdRng::seed_from_u64(3);
        let counts: Vec<usize> = (0..2_000)
            .map(|_| pick_count(8, SelectionMode::Standard, &mut rng))
            .collect();

        assert!(counts.iter().all(|c| *c <= 5));
        let high = counts.iter().filter(|c| **c >= 4).count();
        // Expected around 400 of 2000.
        assert!((250..=550).contains(&high), "high band drawn {high} times");
    }

    proptest! {
        #[test]
        fn counts_never_exceed_available(
            available in 0usize..20,
            seed in any::<u64>(),
            sp in any::<bool>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mode = if sp { SelectionMode::Sp } else { SelectionMode::Standard };
            let count = pick_count(available, mode, &mut rng);
            prop_assert!(count <= available);
            prop_assert!(count <= 5);
            if sp && available >= 3 {
                prop_assert!(count >= 3);
            }
        }
    }
}
