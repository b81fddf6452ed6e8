// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Process-wide termination signal
//!
//! OS signal handlers are installed once per process. Every caller of
//! [`shutdown_signal`] receives a receiver on the same channel.

use std::sync::OnceLock;
use tokio::sync::watch;

static SHUTDOWN: OnceLock<watch::Sender<bool>> = OnceLock::new();

fn sender() -> &'static watch::Sender<bool> {
    SHUTDOWN.get_or_init(|| {
        let (tx, _rx) = watch::channel(false);
        let notifier = tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received");
            notifier.send_replace(true);
        });
        tracing::debug!("Installed termination signal handlers");
        tx
    })
}

/// Receiver that flips to `true` on Ctrl-C, SIGTERM or [`trigger_shutdown`]
///
/// Must first be called from within a tokio runtime.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    sender().subscribe()
}

/// Requests shutdown as if a termination signal had arrived; idempotent
pub fn trigger_shutdown() {
    if !sender().send_replace(true) {
        tracing::info!("Shutdown requested");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
