//! Storage contract for invite codes, droplet slots and the water rotation.
//!
//! The traits describe what the engine needs from a transactional backend:
//! - a conditional single-row update that reports whether it applied
//! - uniqueness violations surfaced as distinguishable outcomes
//! - all-or-nothing multi-row writes
//! - random selection performed inside the backend query

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::droplet::SlotFill;
use crate::model::{
    CodeType, DropletCode, DropletCodeStatus, IdentityKey, InviteCode, Owner, RotationEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub use memory::InMemoryInviteStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresInviteStore;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate invite code: {0}")]
    DuplicateCode(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient pool: needed {needed}, available {available}")]
    InsufficientPool { needed: u64, available: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result of the conditional bind write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The write applied; the code as stored afterwards.
    Bound(InviteCode),
    /// The code was no longer unbound when the write ran.
    AlreadyBound,
    /// One of the owner's identity fields already owns another code.
    OwnerTaken(IdentityKey),
    /// No such code.
    NotFound,
}

/// Invite code rows.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Insert a new unbound code. Fails with `DuplicateCode` if it exists.
    async fn create_code(
        &self,
        code: &str,
        code_type: CodeType,
        created_at: DateTime<Utc>,
    ) -> StoreResult<InviteCode>;

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<InviteCode>>;

    async fn find_by_owner(&self, key: &IdentityKey) -> StoreResult<Option<InviteCode>>;

    async fn count_by_type(&self, code_type: CodeType) -> StoreResult<u64>;

    async fn count_unbound_by_type(&self, code_type: CodeType) -> StoreResult<u64>;

    /// One uniformly random unbound code of `code_type`, chosen by the backend.
    async fn pick_random_unbound(&self, code_type: CodeType) -> StoreResult<Option<InviteCode>>;

    /// Set owner and bind time only if the code is still unbound.
    ///
    /// This is a single compare-and-set; it is the only write path that binds
    /// a code.
    async fn bind_if_unbound(
        &self,
        code: &str,
        owner: &Owner,
        bound_at: DateTime<Utc>,
    ) -> StoreResult<BindOutcome>;
}

/// Droplet slot assignments.
#[async_trait]
pub trait DropletStore: Send + Sync {
    async fn list_droplet_codes(&self) -> StoreResult<Vec<DropletCode>>;

    /// Fill every slot in `fills` with fresh unbound water codes, oldest
    /// first, in one unit.
    ///
    /// Fails with `InsufficientPool` if the pool is short and with `Conflict`
    /// if any slot no longer holds `existing` codes. Nothing is written on
    /// failure.
    async fn assign_droplet_slots(
        &self,
        fills: &[SlotFill],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<DropletCode>>;

    /// Slots of the highest round joined with each code's bound state.
    async fn latest_round_with_status(&self) -> StoreResult<Vec<DropletCodeStatus>>;

    /// Unbound water codes not yet placed in any droplet slot.
    async fn count_unassigned_water(&self) -> StoreResult<u64>;
}

/// Water rotation snapshot.
#[async_trait]
pub trait RotationStore: Send + Sync {
    async fn rotation_snapshot(&self) -> StoreResult<Vec<RotationEntry>>;

    /// Delete the whole snapshot and insert up to `size` random unbound water
    /// codes, in one unit. Concurrent replacements are serialized.
    async fn replace_rotation(
        &self,
        size: usize,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<RotationEntry>>;

    /// Replace the snapshot only if [`rotation_is_stale`] at `now`.
    ///
    /// The staleness check and the replacement run in the same unit, so
    /// concurrent callers redraw at most once.
    async fn refresh_rotation_if_stale(
        &self,
        size: usize,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RotationRefresh>;
}

/// Snapshot returned by [`RotationStore::refresh_rotation_if_stale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRefresh {
    pub entries: Vec<RotationEntry>,
    /// Whether this call redrew the snapshot.
    pub refreshed: bool,
}

/// A snapshot is stale when it is empty or its oldest entry is at least
/// `max_age` old.
pub fn rotation_is_stale(
    oldest: Option<DateTime<Utc>>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    match oldest {
        Some(created_at) => created_at + max_age <= now,
        None => true,
    }
}

/// Storage bundle used by the engine and the service.
pub trait InviteStorage: CodeStore + DropletStore + RotationStore + Send + Sync {}

impl<T> InviteStorage for T where T: CodeStore + DropletStore + RotationStore + Send + Sync {}
