// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Connection lifecycle supervision
//!
//! Periodically sweeps idle connections and, once shutdown is requested,
//! drains every registry within a bounded time.

mod signal;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::mikrotik::ConnectionManager;

pub use signal::{shutdown_signal, trigger_shutdown};

/// Timing of the supervisor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Time between sweeps (5 minutes)
    pub sweep_interval: Duration,
    /// Idle time after which a connection is evicted (30 minutes)
    pub connection_ttl: Duration,
    /// Upper bound for draining on shutdown (10 seconds)
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            connection_ttl: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for SupervisorSettings {
    fn from(config: &Config) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            connection_ttl: Duration::from_secs(config.connection_ttl_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

/// Outcome of the final drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection was closed; carries how many
    Completed(usize),
    /// The shutdown timeout elapsed first
    TimedOut,
}

/// Drains all registries, giving up after `timeout`
pub async fn drain_with_timeout(manager: &ConnectionManager, timeout: Duration) -> DrainOutcome {
    match tokio::time::timeout(timeout, manager.shutdown()).await {
        Ok(closed) => {
            tracing::info!("Closed {} connection(s)", closed);
            DrainOutcome::Completed(closed)
        }
        Err(_) => {
            tracing::warn!("Connection drain did not finish within {:?}", timeout);
            DrainOutcome::TimedOut
        }
    }
}

/// Starts the supervisor task
///
/// Sweeps every `sweep_interval` until `shutdown_rx` turns `true`, then drains
/// and resolves with the drain outcome.
pub fn start_supervisor(
    manager: Arc<ConnectionManager>,
    settings: SupervisorSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<DrainOutcome> {
    tracing::info!(
        "Starting connection supervisor (sweep every {:?}, ttl {:?})",
        settings.sweep_interval,
        settings.connection_ttl
    );
    tokio::spawn(async move {
        let mut sweep_ticker = tokio::time::interval(settings.sweep_interval);
        // the first tick completes immediately
        sweep_ticker.tick().await;
        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = sweep_ticker.tick() => {
                    let evicted = manager.sweep(settings.connection_ttl).await;
                    if evicted > 0 {
                        tracing::info!("Swept {} idle connection(s)", evicted);
                    } else {
                        tracing::debug!("Sweep found nothing to evict");
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }
        tracing::info!("Stopping connection supervisor");
        drain_with_timeout(&manager, settings.shutdown_timeout).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mikrotik::{ConnectionSettings, StaticResolver, TcpDialer};

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            Arc::new(TcpDialer),
            Arc::new(StaticResolver::new()),
            ConnectionSettings::default(),
            None,
        ))
    }

    #[test]
    fn test_default_settings() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.sweep_interval, Duration::from_secs(300));
        assert_eq!(settings.connection_ttl, Duration::from_secs(1800));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_supervisor_drains_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = start_supervisor(manager(), SupervisorSettings::default(), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send_replace(true);

        assert_eq!(handle.await.unwrap(), DrainOutcome::Completed(0));
    }

    #[tokio::test]
    async fn test_supervisor_stops_when_already_shut_down() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let handle = start_supervisor(manager(), SupervisorSettings::default(), shutdown_rx);
        assert_eq!(handle.await.unwrap(), DrainOutcome::Completed(0));
    }
}
