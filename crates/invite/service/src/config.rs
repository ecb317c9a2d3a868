//! Configuration for the invite service

use crate::error::{ServiceError, ServiceResult};
use crate::signature::{SignatureVerifier, TrustUpstreamVerifier};
use invite_core::{CachePolicy, DropletLayout, MAX_TOP_UP_COUNT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Pool sizes generated at startup
    #[serde(default)]
    pub supply: SupplyConfig,

    #[serde(default)]
    pub droplets: DropletConfig,

    /// Public water code rotation
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Quest provider used by task claims
    #[serde(default)]
    pub quests: QuestConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8092)),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage, state is lost on restart
    #[default]
    Memory,

    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

impl StorageConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplyConfig {
    #[serde(default)]
    pub task_codes: u64,

    #[serde(default)]
    pub direct_codes: u64,

    /// Defaults to enough water codes for every configured droplet round.
    #[serde(default)]
    pub water_codes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropletConfig {
    #[serde(default = "default_droplet_count")]
    pub droplet_count: u32,

    #[serde(default = "default_codes_per_droplet")]
    pub codes_per_droplet: u32,

    /// Minimum age of a round before the next one opens
    #[serde(default = "default_dwell")]
    pub dwell_secs: u64,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default)]
    pub max_rounds: Option<u32>,
}

impl Default for DropletConfig {
    fn default() -> Self {
        Self {
            droplet_count: default_droplet_count(),
            codes_per_droplet: default_codes_per_droplet(),
            dwell_secs: default_dwell(),
            tick_interval_secs: default_tick_interval(),
            max_rounds: None,
        }
    }
}

impl DropletConfig {
    pub fn layout(&self) -> ServiceResult<DropletLayout> {
        let dwell_secs = i64::try_from(self.dwell_secs)
            .map_err(|_| ServiceError::Config(format!("dwell_secs {} too large", self.dwell_secs)))?;
        let mut layout = DropletLayout::new(
            self.droplet_count,
            self.codes_per_droplet,
            chrono::Duration::seconds(dwell_secs),
        );
        layout.max_rounds = self.max_rounds;
        Ok(layout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_rotation_size")]
    pub size: usize,

    #[serde(default = "default_rotation_refresh")]
    pub refresh_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            size: default_rotation_size(),
            refresh_secs: default_rotation_refresh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestConfig {
    #[serde(default = "default_quest_base_url")]
    pub base_url: String,

    /// Task claims are disabled when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub subdomain: String,

    #[serde(default = "default_quest_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_tasks_ttl")]
    pub tasks_ttl_secs: u64,

    /// Unset keeps member lookups forever
    #[serde(default)]
    pub member_ttl_secs: Option<u64>,

    #[serde(default = "default_progress_ttl")]
    pub progress_ttl_secs: u64,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            base_url: default_quest_base_url(),
            api_key: None,
            subdomain: String::new(),
            request_timeout_secs: default_quest_timeout(),
            tasks_ttl_secs: default_tasks_ttl(),
            member_ttl_secs: None,
            progress_ttl_secs: default_progress_ttl(),
        }
    }
}

impl QuestConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty()) && !self.subdomain.is_empty()
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            tasks_ttl: Some(Duration::from_secs(self.tasks_ttl_secs)),
            member_ttl: self.member_ttl_secs.map(Duration::from_secs),
            progress_ttl: Some(Duration::from_secs(self.progress_ttl_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted distance between a signed timestamp and now
    #[serde(default = "default_sign_window")]
    pub sign_window_secs: u64,

    /// Accept any non-empty signature. Only for deployments where a gateway
    /// in front of the service has already verified it.
    #[serde(default)]
    pub trust_upstream_signatures: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            sign_window_secs: default_sign_window(),
            trust_upstream_signatures: false,
        }
    }
}

impl AuthConfig {
    /// Pick the signature verifier: `supplied` if given, otherwise the
    /// pass-through verifier when trusting upstream is enabled.
    pub fn verifier(
        &self,
        supplied: Option<Arc<dyn SignatureVerifier>>,
    ) -> ServiceResult<Arc<dyn SignatureVerifier>> {
        match supplied {
            Some(verifier) => Ok(verifier),
            None if self.trust_upstream_signatures => {
                tracing::warn!(
                    "signatures are not verified in-process, deploy behind a verifying gateway"
                );
                Ok(Arc::new(TrustUpstreamVerifier))
            }
            None => Err(ServiceError::Config(
                "no signature verifier available; set auth.trust_upstream_signatures only \
                 behind a gateway that verifies wallet signatures"
                    .to_string(),
            )),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_droplet_count() -> u32 {
    10
}

fn default_codes_per_droplet() -> u32 {
    5
}

fn default_dwell() -> u64 {
    7 * 24 * 60 * 60
}

fn default_tick_interval() -> u64 {
    300
}

fn default_rotation_size() -> usize {
    invite_core::DEFAULT_ROTATION_SIZE
}

fn default_rotation_refresh() -> u64 {
    invite_core::DEFAULT_ROTATION_REFRESH_SECS as u64
}

fn default_quest_base_url() -> String {
    "https://api-v2.zealy.io/public".to_string()
}

fn default_quest_timeout() -> u64 {
    10
}

fn default_tasks_ttl() -> u64 {
    10 * 60
}

fn default_progress_ttl() -> u64 {
    1
}

fn default_sign_window() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Defaults, then the optional file, then `INVITE_*` environment variables
    /// (`INVITE_DROPLETS__DWELL_SECS=60`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("INVITE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Water codes needed to fill every configured round, or one round when
    /// rounds are unbounded.
    pub fn water_target(&self) -> u64 {
        self.supply.water_codes.unwrap_or_else(|| {
            let rounds = u64::from(self.droplets.max_rounds.unwrap_or(1));
            u64::from(self.droplets.droplet_count)
                * u64::from(self.droplets.codes_per_droplet)
                * rounds
        })
    }

    pub fn validate(&self) -> ServiceResult<()> {
        let targets = [
            ("task_codes", self.supply.task_codes),
            ("direct_codes", self.supply.direct_codes),
            ("water_codes", self.water_target()),
        ];
        for (name, target) in targets {
            if target > MAX_TOP_UP_COUNT {
                return Err(ServiceError::Config(format!(
                    "supply.{name} = {target} exceeds the maximum of {MAX_TOP_UP_COUNT}"
                )));
            }
        }

        if self.droplets.tick_interval_secs == 0 {
            return Err(ServiceError::Config(
                "droplets.tick_interval_secs must be positive".to_string(),
            ));
        }
        if self.droplets.max_rounds == Some(0) {
            return Err(ServiceError::Config(
                "droplets.max_rounds must be at least 1 when set".to_string(),
            ));
        }
        if self.rotation.refresh_secs == 0 {
            return Err(ServiceError::Config(
                "rotation.refresh_secs must be positive".to_string(),
            ));
        }
        if let StorageConfig::Postgres { url, .. } = &self.storage {
            if url.trim().is_empty() {
                return Err(ServiceError::Config("storage.url is required".to_string()));
            }
        }
        self.droplets.layout()?;
        Ok(())
    }
}
