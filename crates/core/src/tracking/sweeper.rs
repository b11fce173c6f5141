use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::service::TrackingService;
use crate::config::TrackingConfig;

/// Periodic re-subscription of in-transit shipments.
pub struct TrackingSweeper {
    service: Arc<TrackingService>,
    config: TrackingConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TrackingSweeper {
    pub fn new(service: Arc<TrackingService>, config: TrackingConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            service,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the sweep loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Tracking sweeper already running");
            return;
        }

        if self.config.sweep_on_start {
            if let Err(e) = self.service.check_active_shipments().await {
                warn!("Initial tracking sweep failed: {}", e);
            }
        }

        let running = Arc::clone(&self.running);
        let service = Arc::clone(&self.service);
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        let max_jitter = Duration::from_secs(self.config.sweep_jitter_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Tracking sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Tracking sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval + jitter(max_jitter)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = service.check_active_shipments().await {
                            warn!("Tracking sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Tracking sweep loop stopped");
        });
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        info!("Tracking sweeper stopped");
    }
}

/// A delay in `[0, max)` so replicas do not sweep in lockstep.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(seed % max_ms)
}
