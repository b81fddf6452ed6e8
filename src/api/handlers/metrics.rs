// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::AppState;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// GET /metrics
///
/// Refreshes pool gauges from the registries, then encodes the registry.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.manager.stats().await;
    state.metrics.update_from_stats(&stats);
    tracing::debug!("/metrics encode");
    match state.metrics.encode_metrics().await {
        Ok(metrics_text) => (
            StatusCode::OK,
            [("Content-Type", OPENMETRICS_CONTENT_TYPE)],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}
