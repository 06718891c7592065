//! Background rotation scheduler.
//!
//! Runs a periodic sweep over secrets whose rotation deadline has passed.
//! The sweep itself lives in [`ItemService::rotate`]; this module only owns
//! the timer loop and graceful shutdown.

use crate::config::RotationConfig;
use crate::services::ItemService;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Periodic driver for due-secret rotation
pub struct RotationScheduler {
    service: ItemService,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl RotationScheduler {
    pub fn new(service: ItemService, config: &RotationConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            service: service.with_rotation_concurrency(config.max_concurrency),
            interval: Duration::from_secs(config.sweep_interval_secs),
            shutdown_rx,
        }
    }

    /// Spawn the scheduler loop. The first sweep runs one full interval
    /// after startup.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Rotation scheduler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.service.rotate(chrono::Utc::now()).await {
                            Ok(sweep) if sweep.rotated > 0 || sweep.failed > 0 => {
                                info!(rotated = sweep.rotated, failed = sweep.failed, "Rotation sweep finished");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Rotation sweep failed"),
                        }
                    }
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() || *self.shutdown_rx.borrow() {
                            info!("Rotation scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
