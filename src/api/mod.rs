// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! HTTP API module for the RouterOS connector
//!
//! Provides operational endpoints for health checks, connection statistics
//! and Prometheus metrics export.
//!
//! # Endpoints
//! - `GET /health`: health check
//! - `GET /stats`: connection registry snapshot
//! - `GET /metrics`: Prometheus metrics

pub mod handlers;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::mikrotik::ConnectionManager;

/// Application state shared with endpoints
pub struct AppState {
    pub config: Config,
    pub manager: Arc<ConnectionManager>,
    pub metrics: MetricsRegistry,
}

/// Creates the main Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}
