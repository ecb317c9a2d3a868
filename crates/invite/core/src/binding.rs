//! Binding engine: claims one unbound code for one identity.
//!
//! Every entry point ends in [`CodeStore::bind_if_unbound`], a single
//! compare-and-set at the storage boundary. Reads made before it (owner
//! lookup, type check) are policy checks only; losing a race between the read
//! and the write is reported as `AlreadyBound` or `OwnerAlreadyBound`.
//!
//! [`CodeStore::bind_if_unbound`]: crate::store::CodeStore::bind_if_unbound

use crate::model::{CodeType, IdentityKey, InviteCode, Owner};
use crate::quest::{QuestTask, TaskGate};
use crate::store::{BindOutcome, InviteStorage};
use crate::{InviteError, InviteResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Which code a bind targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimTarget {
    /// A caller-supplied code that must be one of `accepted`.
    Explicit {
        code: String,
        accepted: Vec<CodeType>,
    },
    /// Any unbound code of the type, picked at random by the store.
    Pool(CodeType),
}

/// Successful bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindReceipt {
    pub code: String,
    pub code_type: CodeType,
    pub owner: Owner,
    pub bound_at: DateTime<Utc>,
}

impl BindReceipt {
    fn from_bound(code: InviteCode, owner: &Owner, fallback: DateTime<Utc>) -> Self {
        Self {
            owner: code.owner.unwrap_or_else(|| owner.clone()),
            bound_at: code.bound_at.unwrap_or(fallback),
            code: code.code,
            code_type: code.code_type,
        }
    }
}

/// Binding state of a wallet plus its quest progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub bound: bool,
    pub invite_code: Option<String>,
    pub tasks: Vec<QuestTask>,
}

#[derive(Clone)]
pub struct BindingEngine {
    store: Arc<dyn InviteStorage>,
    gate: Option<Arc<TaskGate>>,
}

impl BindingEngine {
    pub fn new(store: Arc<dyn InviteStorage>) -> Self {
        Self { store, gate: None }
    }

    pub fn with_task_gate(mut self, gate: Arc<TaskGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Bind `target` to `owner`.
    ///
    /// Binding conflicts are terminal and never retried here.
    pub async fn bind(&self, target: ClaimTarget, owner: Owner) -> InviteResult<BindReceipt> {
        let owner = owner.normalized();
        if !owner.has_identity() {
            return Err(InviteError::InvalidOwner(
                "at least one of wallet, discord id or user id is required".to_string(),
            ));
        }
        self.ensure_unowned(&owner).await?;

        let code = self.resolve(target).await?;
        let now = Utc::now();

        match self.store.bind_if_unbound(&code, &owner, now).await? {
            BindOutcome::Bound(bound) => {
                let receipt = BindReceipt::from_bound(bound, &owner, now);
                info!(
                    code = %receipt.code,
                    code_type = %receipt.code_type,
                    owner = ?owner.identity_keys(),
                    "invite code bound"
                );
                Ok(receipt)
            }
            BindOutcome::AlreadyBound => {
                info!(%code, "bind lost: code already bound");
                Err(InviteError::AlreadyBound(code))
            }
            BindOutcome::OwnerTaken(key) => {
                info!(%code, identity = %key, "bind lost: identity already owns a code");
                Err(InviteError::OwnerAlreadyBound(key.to_string()))
            }
            BindOutcome::NotFound => Err(InviteError::NotFound(format!("invite code {code}"))),
        }
    }

    /// Public claim: the caller presents a direct or water code.
    pub async fn claim_presented(&self, code: &str, owner: Owner) -> InviteResult<BindReceipt> {
        self.bind(
            ClaimTarget::Explicit {
                code: code.trim().to_string(),
                accepted: vec![CodeType::Direct, CodeType::Water],
            },
            owner,
        )
        .await
    }

    /// Operator claim of a direct code.
    pub async fn claim_direct(&self, code: &str, owner: Owner) -> InviteResult<BindReceipt> {
        self.bind(
            ClaimTarget::Explicit {
                code: code.trim().to_string(),
                accepted: vec![CodeType::Direct],
            },
            owner,
        )
        .await
    }

    /// Task claim: after the quest gate admits `wallet`, bind a random task
    /// code to the wallet and its quest identity.
    pub async fn claim_task(&self, wallet: &str) -> InviteResult<BindReceipt> {
        let gate = self
            .gate
            .as_ref()
            .ok_or_else(|| InviteError::Provider("no quest provider configured".to_string()))?;

        let wallet_owner = Owner::wallet(wallet);
        if !wallet_owner.has_identity() {
            return Err(InviteError::InvalidOwner("wallet address is required".to_string()));
        }
        self.ensure_unowned(&wallet_owner).await?;

        let member = gate.admit(wallet).await?;
        let discord_id = member.discord_id.clone().unwrap_or_default();
        let owner = wallet_owner
            .with_discord(discord_id, member.discord_handle.clone())
            .with_user_id(member.id.clone());

        self.bind(ClaimTarget::Pool(CodeType::Task), owner).await
    }

    /// Whether `wallet` owns a code, plus its quest progress.
    ///
    /// Progress is reported for unbound wallets and for task-code holders.
    pub async fn user_status(&self, wallet: &str) -> InviteResult<UserStatus> {
        let key = IdentityKey::wallet(wallet);
        if key.value().is_empty() {
            return Ok(UserStatus::default());
        }

        match self.store.find_by_owner(&key).await? {
            Some(code) => {
                let tasks = match (&self.gate, code.code_type) {
                    (Some(gate), CodeType::Task) => {
                        gate.progress_for_wallet(key.value()).await.unwrap_or_default()
                    }
                    _ => Vec::new(),
                };
                Ok(UserStatus {
                    bound: true,
                    invite_code: Some(code.code),
                    tasks,
                })
            }
            None => {
                let tasks = match &self.gate {
                    Some(gate) => gate.progress_for_wallet(key.value()).await?,
                    None => Vec::new(),
                };
                Ok(UserStatus {
                    bound: false,
                    invite_code: None,
                    tasks,
                })
            }
        }
    }

    async fn ensure_unowned(&self, owner: &Owner) -> InviteResult<()> {
        for key in owner.identity_keys() {
            if let Some(existing) = self.store.find_by_owner(&key).await? {
                debug!(identity = %key, code = %existing.code, "identity already bound");
                return Err(InviteError::OwnerAlreadyBound(key.to_string()));
            }
        }
        Ok(())
    }

    async fn resolve(&self, target: ClaimTarget) -> InviteResult<String> {
        match target {
            ClaimTarget::Explicit { code, accepted } => {
                let Some(found) = self.store.find_by_code(&code).await? else {
                    debug!(%code, "presented code does not exist");
                    return Err(InviteError::NotFound(format!("invite code {code}")));
                };
                if !accepted.contains(&found.code_type) {
                    return Err(InviteError::TypeMismatch {
                        code,
                        actual: found.code_type,
                        expected: accepted,
                    });
                }
                Ok(found.code)
            }
            ClaimTarget::Pool(code_type) => match self.store.pick_random_unbound(code_type).await? {
                Some(found) => Ok(found.code),
                None => Err(InviteError::InsufficientPool {
                    needed: 1,
                    available: 0,
                }),
            },
        }
    }
}
