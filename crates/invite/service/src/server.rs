//! Server setup and lifecycle management

use crate::api::create_router;
use crate::error::{ServiceError, ServiceResult};
use crate::state::AppState;
use crate::ticker::DropletTicker;
use tokio::net::TcpListener;
use tokio::time::Duration;

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve the API and run the droplet ticker until a shutdown signal.
    pub async fn run(self) -> ServiceResult<()> {
        let config = self.state.config.clone();
        let addr = config.server.listen_addr;

        let (ticker, trigger_rx) = DropletTicker::new(
            self.state.scheduler.clone(),
            Duration::from_secs(config.droplets.tick_interval_secs),
        );
        let ticker_task = tokio::spawn(ticker.clone().run(trigger_rx));

        let app = create_router(self.state);
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, storage = config.storage.backend_name(), "invite service listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServiceError::Server(e.to_string()));

        tracing::info!("invite service shutting down");
        ticker.stop();
        if let Err(e) = ticker_task.await {
            tracing::warn!(error = %e, "droplet ticker ended abnormally");
        }

        served
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received terminate signal, initiating graceful shutdown");
        }
    }
}
