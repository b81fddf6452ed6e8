// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Prometheus metrics for the connection layer
//!
//! Contains label types and the metrics registry.

mod labels;
mod registry;

#[cfg(test)]
mod tests;

/// Labels for pool and dial metrics
pub use labels::{DialLabels, PoolLabels};

/// Prometheus metrics registry
pub use registry::MetricsRegistry;
