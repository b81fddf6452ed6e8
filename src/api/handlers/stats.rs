// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::api::AppState;

/// GET /stats
///
/// Snapshot of both connection registries.
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.manager.stats().await;
    tracing::trace!(
        "/stats: {} logical, {} direct, {} stream(s)",
        stats.logical.total,
        stats.direct.total,
        stats.streams
    );
    Json(stats)
}
