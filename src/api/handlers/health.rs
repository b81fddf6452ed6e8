// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;

/// Health check endpoint response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Devices known by logical id
    pub devices: usize,
}

/// GET /health
///
/// Simple health check endpoint for monitoring service status.
/// Returns "ok" status and application version.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices: state.config.devices.len(),
    };

    (StatusCode::OK, Json(response))
}
