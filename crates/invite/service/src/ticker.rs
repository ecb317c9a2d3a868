//! Periodic droplet round scheduling

use invite_core::RoundScheduler;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs the round scheduler on an interval and on demand.
pub struct DropletTicker {
    scheduler: RoundScheduler,
    period: Duration,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl DropletTicker {
    pub fn new(scheduler: RoundScheduler, period: Duration) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = watch::channel(false);

        let ticker = Arc::new(Self {
            scheduler,
            period,
            trigger_tx,
            shutdown_tx,
        });
        (ticker, trigger_rx)
    }

    /// Request a pass outside the regular interval.
    pub async fn trigger(&self) {
        let _ = self.trigger_tx.send(()).await;
    }

    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Loop until [`stop`](Self::stop) is called. Failed passes are logged and
    /// retried on the next tick.
    pub async fn run(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<()>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticks = interval(self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_secs = self.period.as_secs(), "droplet ticker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = ticks.tick() => self.pass("interval").await,
                Some(_) = trigger_rx.recv() => self.pass("trigger").await,
                _ = shutdown_rx.changed() => {}
            }
        }

        tracing::info!("droplet ticker stopped");
    }

    async fn pass(&self, cause: &'static str) {
        match self.scheduler.advance().await {
            Ok(report) if report.is_idle() => {
                tracing::debug!(cause, "droplet pass idle");
            }
            Ok(report) => {
                tracing::info!(
                    cause,
                    assigned = report.assigned.len(),
                    round = report.highest_round().unwrap_or_default(),
                    "droplet pass assigned codes"
                );
            }
            Err(e) => {
                tracing::error!(cause, error = %e, "droplet pass failed");
            }
        }
    }
}
