// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

mod health;
mod metrics;
mod stats;

pub use health::{HealthResponse, health_check};
pub use metrics::metrics_handler;
pub use stats::stats_handler;
