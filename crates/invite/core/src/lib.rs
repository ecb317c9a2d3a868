//! Invitation code allocation and binding core.
//!
//! This crate owns the invariant-preserving part of the invite service:
//! - issuing unique random codes and topping up each code pool
//! - binding a code to exactly one external identity, exactly once
//! - staging unbound water codes into timed droplet rounds
//! - sampling the public, partially hidden droplet view
//! - read-only counters per code type
//!
//! Design stance:
//! - Cross-request safety is delegated to the storage backend. Binding is a
//!   single compare-and-set at the storage boundary, owner uniqueness is a
//!   storage constraint, and a droplet round top-up commits as one unit.
//! - Nothing in this crate holds an in-process lock across a storage call.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod binding;
pub mod cache;
pub mod droplet;
mod error;
pub mod generator;
mod model;
pub mod quest;
pub mod rotation;
pub mod stats;
pub mod store;
pub mod supply;

pub use binding::{BindReceipt, BindingEngine, ClaimTarget, UserStatus};
pub use cache::{CachePolicy, TtlCache};
pub use droplet::{plan_top_up, DropletLayout, RoundScheduler, SlotFill, TopUpReport};
pub use error::{InviteError, InviteResult};
pub use generator::{CodeSource, RandomCodeSource, CODE_ALPHABET, CODE_LENGTH};
pub use model::{
    CodeType, DropletCode, DropletCodeStatus, IdentityKey, InviteCode, Owner, RotationEntry,
};
pub use quest::{QuestMember, QuestProvider, QuestTask, TaskGate};
pub use rotation::{
    pick_count, summarize_droplets, DropletSummary, RotationSampler, SelectionMode, WaterRotation,
    DEFAULT_ROTATION_REFRESH_SECS, DEFAULT_ROTATION_SIZE,
};
pub use stats::{CodeStats, StatsAggregator};
pub use store::{
    rotation_is_stale, BindOutcome, CodeStore, DropletStore, InMemoryInviteStore, InviteStorage,
    RotationRefresh, RotationStore, StoreError, StoreResult,
};
#[cfg(feature = "postgres")]
pub use store::PostgresInviteStore;
pub use supply::{SupplyManager, DEFAULT_MAX_COLLISION_RETRIES, MAX_TOP_UP_COUNT};
