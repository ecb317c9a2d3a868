//! Pool top-up: generate codes until a type reaches its target count.

use crate::generator::{CodeSource, RandomCodeSource};
use crate::model::{CodeType, InviteCode};
use crate::store::{InviteStorage, StoreError};
use crate::{InviteError, InviteResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest target accepted for a single code type.
pub const MAX_TOP_UP_COUNT: u64 = 100_000;

/// Collision retries per generated code before giving up.
pub const DEFAULT_MAX_COLLISION_RETRIES: u32 = 8;

#[derive(Clone)]
pub struct SupplyManager {
    store: Arc<dyn InviteStorage>,
    source: Arc<dyn CodeSource>,
    max_retries: u32,
}

impl SupplyManager {
    pub fn new(store: Arc<dyn InviteStorage>) -> Self {
        Self {
            store,
            source: Arc::new(RandomCodeSource),
            max_retries: DEFAULT_MAX_COLLISION_RETRIES,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CodeSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Generate and insert one code, regenerating on collision.
    pub async fn create_one(&self, code_type: CodeType) -> InviteResult<InviteCode> {
        let mut attempt = 0;
        loop {
            let candidate = self.source.generate()?;
            match self
                .store
                .create_code(&candidate, code_type, Utc::now())
                .await
            {
                Ok(code) => return Ok(code),
                Err(StoreError::DuplicateCode(code)) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(%code, attempt, "generated code collided, regenerating");
                }
                Err(StoreError::DuplicateCode(code)) => {
                    warn!(%code, attempts = attempt + 1, "giving up after repeated collisions");
                    return Err(InviteError::DuplicateCode(code));
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Bring `code_type` up to `target` codes. Returns how many were created.
    pub async fn top_up(&self, code_type: CodeType, target: u64) -> InviteResult<u64> {
        if target > MAX_TOP_UP_COUNT {
            return Err(InviteError::InvalidTarget {
                requested: target,
                max: MAX_TOP_UP_COUNT,
            });
        }

        let existing = self.store.count_by_type(code_type).await?;
        let missing = target.saturating_sub(existing);
        if missing == 0 {
            debug!(%code_type, existing, target, "pool already at target");
            return Ok(0);
        }

        for _ in 0..missing {
            self.create_one(code_type).await?;
        }
        info!(%code_type, created = missing, target, "pool topped up");
        Ok(missing)
    }

    /// Make sure at least `needed` unbound water codes sit outside every
    /// droplet slot. Returns how many were created.
    pub async fn ensure_unassigned_water(&self, needed: u64) -> InviteResult<u64> {
        let unassigned = self.store.count_unassigned_water().await?;
        let missing = needed.saturating_sub(unassigned);
        if missing == 0 {
            return Ok(0);
        }
        if missing > MAX_TOP_UP_COUNT {
            return Err(InviteError::InvalidTarget {
                requested: missing,
                max: MAX_TOP_UP_COUNT,
            });
        }

        for _ in 0..missing {
            self.create_one(CodeType::Water).await?;
        }
        info!(created = missing, needed, "water pool replenished for droplets");
        Ok(missing)
    }
}
