use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifies how a code may be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    /// Pool codes handed out after the holder completes the required quests.
    Task,
    /// Codes claimed by presenting the code itself.
    Direct,
    /// Pool codes staged into droplet rounds and the public rotation.
    Water,
}

impl CodeType {
    pub const ALL: [CodeType; 3] = [CodeType::Task, CodeType::Direct, CodeType::Water];

    /// Stable numeric tag used by persistent backends.
    pub fn as_i16(self) -> i16 {
        match self {
            CodeType::Task => 0,
            CodeType::Direct => 1,
            CodeType::Water => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(CodeType::Task),
            1 => Some(CodeType::Direct),
            2 => Some(CodeType::Water),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CodeType::Task => "task",
            CodeType::Direct => "direct",
            CodeType::Water => "water",
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One unique identity field of an owner.
///
/// Every variant is backed by its own uniqueness constraint, so an identity
/// can own at most one code system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IdentityKey {
    Wallet(String),
    Discord(String),
    User(String),
}

impl IdentityKey {
    /// Wallet keys are compared case-insensitively.
    pub fn wallet(address: impl AsRef<str>) -> Self {
        IdentityKey::Wallet(address.as_ref().trim().to_ascii_lowercase())
    }

    pub fn value(&self) -> &str {
        match self {
            IdentityKey::Wallet(v) | IdentityKey::Discord(v) | IdentityKey::User(v) => v,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            IdentityKey::Wallet(_) => "wallet_address",
            IdentityKey::Discord(_) => "discord_id",
            IdentityKey::User(_) => "user_id",
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field(), self.value())
    }
}

/// Identity fields written together by one successful bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub wallet_address: Option<String>,
    pub discord_id: Option<String>,
    /// Display name only; not part of any uniqueness constraint.
    pub discord_name: Option<String>,
    pub user_id: Option<String>,
}

impl Owner {
    pub fn wallet(address: impl AsRef<str>) -> Self {
        Self {
            wallet_address: Some(address.as_ref().to_string()),
            ..Default::default()
        }
        .normalized()
    }

    pub fn with_discord(mut self, discord_id: impl Into<String>, name: Option<String>) -> Self {
        self.discord_id = Some(discord_id.into());
        self.discord_name = name;
        self.normalized()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.normalized()
    }

    /// Trims every field, drops empty ones and lower-cases the wallet.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            wallet_address: clean(self.wallet_address).map(|v| v.to_ascii_lowercase()),
            discord_id: clean(self.discord_id),
            discord_name: clean(self.discord_name),
            user_id: clean(self.user_id),
        }
    }

    /// Unique identity fields present on this owner.
    pub fn identity_keys(&self) -> Vec<IdentityKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(wallet) = &self.wallet_address {
            keys.push(IdentityKey::Wallet(wallet.clone()));
        }
        if let Some(discord) = &self.discord_id {
            keys.push(IdentityKey::Discord(discord.clone()));
        }
        if let Some(user) = &self.user_id {
            keys.push(IdentityKey::User(user.clone()));
        }
        keys
    }

    pub fn has_identity(&self) -> bool {
        self.wallet_address.is_some() || self.discord_id.is_some() || self.user_id.is_some()
    }
}

/// Persistent invitation code.
///
/// `bound_at` is `None` while the code is unbound; `owner` is set exactly when
/// `bound_at` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteCode {
    pub code: String,
    pub code_type: CodeType,
    pub owner: Option<Owner>,
    pub bound_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn unbound(code: impl Into<String>, code_type: CodeType, created_at: DateTime<Utc>) -> Self {
        Self {
            code: code.into(),
            code_type,
            owner: None,
            bound_at: None,
            created_at,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_at.is_some()
    }
}

/// Assignment of one water code into a `(round, droplet_index)` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletCode {
    pub code: String,
    pub round: u32,
    pub droplet_index: u32,
    pub created_at: DateTime<Utc>,
}

/// Droplet slot member joined with the bound state of its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletCodeStatus {
    pub code: String,
    pub round: u32,
    pub droplet_index: u32,
    pub used: bool,
}

/// Entry of the water rotation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEntry {
    pub code: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
