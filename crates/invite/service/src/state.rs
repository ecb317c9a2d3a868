//! Shared service state and startup wiring.

use crate::config::{ServiceConfig, StorageConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::signature::{SignatureGate, SignatureVerifier};
use crate::zealy::ZealyClient;
use invite_core::{
    BindingEngine, CodeType, InMemoryInviteStore, InviteError, InviteStorage, QuestProvider,
    RotationSampler, RoundScheduler, StatsAggregator, SupplyManager, TaskGate, WaterRotation,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<dyn InviteStorage>,
    pub engine: BindingEngine,
    pub gate: Option<Arc<TaskGate>>,
    pub stats: StatsAggregator,
    pub sampler: RotationSampler,
    pub water: WaterRotation,
    pub scheduler: RoundScheduler,
    pub supply: SupplyManager,
    pub signatures: SignatureGate,
}

impl AppState {
    /// Open storage and the quest client described by `config`.
    ///
    /// Fails unless `auth.trust_upstream_signatures` is set, since no
    /// in-process verifier is supplied. Use [`AppState::bootstrap_with`] to
    /// plug one in.
    pub async fn bootstrap(config: ServiceConfig) -> ServiceResult<Self> {
        Self::bootstrap_with(config, None).await
    }

    pub async fn bootstrap_with(
        config: ServiceConfig,
        verifier: Option<Arc<dyn SignatureVerifier>>,
    ) -> ServiceResult<Self> {
        let verifier = config.auth.verifier(verifier)?;
        let store = open_storage(&config).await?;

        let provider: Option<Arc<dyn QuestProvider>> = if config.quests.is_enabled() {
            Some(Arc::new(ZealyClient::new(&config.quests)?))
        } else {
            warn!("quest provider not configured, task claims are disabled");
            None
        };

        Self::assemble(config, store, provider, verifier)
    }

    /// Wire components over an already opened store.
    pub fn assemble(
        config: ServiceConfig,
        store: Arc<dyn InviteStorage>,
        provider: Option<Arc<dyn QuestProvider>>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> ServiceResult<Self> {
        let layout = config.droplets.layout()?;
        let gate = provider
            .map(|provider| Arc::new(TaskGate::new(provider, config.quests.cache_policy())));

        let mut engine = BindingEngine::new(store.clone());
        if let Some(gate) = &gate {
            engine = engine.with_task_gate(gate.clone());
        }

        let refresh = i64::try_from(config.rotation.refresh_secs).map_err(|_| {
            ServiceError::Config(format!(
                "rotation.refresh_secs {} too large",
                config.rotation.refresh_secs
            ))
        })?;

        Ok(Self {
            engine,
            gate,
            stats: StatsAggregator::new(store.clone()),
            sampler: RotationSampler::new(store.clone()),
            water: WaterRotation::new(
                store.clone(),
                config.rotation.size,
                chrono::Duration::seconds(refresh),
            ),
            scheduler: RoundScheduler::new(store.clone(), layout)
                .with_supply(SupplyManager::new(store.clone())),
            supply: SupplyManager::new(store.clone()),
            signatures: SignatureGate::new(verifier, config.auth.sign_window_secs),
            store,
            config: Arc::new(config),
        })
    }

    /// Top up every code pool to its configured size, then run one droplet
    /// pass. A water shortfall is logged and left to the ticker.
    pub async fn prime(&self) -> ServiceResult<()> {
        let targets = [
            (CodeType::Task, self.config.supply.task_codes),
            (CodeType::Direct, self.config.supply.direct_codes),
            (CodeType::Water, self.config.water_target()),
        ];
        for (code_type, target) in targets {
            let created = self.supply.top_up(code_type, target).await?;
            info!(%code_type, target, created, "code pool ready");
        }

        match self.scheduler.advance().await {
            Ok(report) if !report.is_idle() => {
                info!(assigned = report.assigned.len(), "initial droplet pass complete");
            }
            Ok(_) => {}
            Err(InviteError::InsufficientPool { needed, available }) => {
                warn!(needed, available, "startup droplet pass skipped, water pool short");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Validate `config` and open only its storage backend.
pub async fn open_storage(config: &ServiceConfig) -> ServiceResult<Arc<dyn InviteStorage>> {
    config.validate()?;
    open_store(&config.storage).await
}

async fn open_store(storage: &StorageConfig) -> ServiceResult<Arc<dyn InviteStorage>> {
    match storage {
        StorageConfig::Memory => {
            warn!("using in-memory storage, state is lost on restart");
            Ok(Arc::new(InMemoryInviteStore::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = invite_core::PostgresInviteStore::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            info!(max_connections, "connected to postgres");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(ServiceError::Config(
            "postgres storage requires the `postgres` feature".to_string(),
        )),
    }
}
