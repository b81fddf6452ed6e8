// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Metrics registry and update logic

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::labels::{DialLabels, PoolLabels};
use crate::mikrotik::{ManagerStats, RegistryKind};

#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Mutex<Registry>>,
    // gauges, refreshed from registry stats on scrape
    connection_pool_size: Family<PoolLabels, Gauge>,
    connection_pool_active: Family<PoolLabels, Gauge>,
    streams_active: Gauge,
    // counters, incremented by the registries
    connection_dials: Family<DialLabels, Counter>,
    connection_evictions: Family<PoolLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let connection_pool_size = Family::<PoolLabels, Gauge>::default();
        registry.register(
            "mikrotik_connection_pool_size",
            "Total number of cached connections",
            connection_pool_size.clone(),
        );

        let connection_pool_active = Family::<PoolLabels, Gauge>::default();
        registry.register(
            "mikrotik_connection_pool_active",
            "Number of cached connections with commands or streams in flight",
            connection_pool_active.clone(),
        );

        let connection_dials = Family::<DialLabels, Counter>::default();
        registry.register(
            "mikrotik_connection_dials",
            "Connection attempts by outcome",
            connection_dials.clone(),
        );

        let connection_evictions = Family::<PoolLabels, Counter>::default();
        registry.register(
            "mikrotik_connection_evictions",
            "Connections removed from the cache",
            connection_evictions.clone(),
        );

        let streams_active = Gauge::default();
        registry.register(
            "mikrotik_streams_active",
            "Number of live stream subscriptions",
            streams_active.clone(),
        );

        Self {
            registry: Arc::new(Mutex::new(registry)),
            connection_pool_size,
            connection_pool_active,
            streams_active,
            connection_dials,
            connection_evictions,
        }
    }

    pub async fn encode_metrics(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let registry = self.registry.lock().await;
        let mut buffer = String::new();
        encode(&mut buffer, &registry)?;
        Ok(buffer)
    }

    /// Creates the per-registry series at zero so rates work from the start
    pub fn initialize_registry_metrics(&self, kind: RegistryKind) {
        let labels = PoolLabels::from(kind);
        let _ = self.connection_pool_size.get_or_create(&labels);
        let _ = self.connection_pool_active.get_or_create(&labels);
        let _ = self.connection_evictions.get_or_create(&labels);
        let _ = self.connection_dials.get_or_create(&DialLabels::new(kind, true));
        let _ = self.connection_dials.get_or_create(&DialLabels::new(kind, false));
    }

    pub fn record_dial(&self, kind: RegistryKind, success: bool) {
        self.connection_dials
            .get_or_create(&DialLabels::new(kind, success))
            .inc();
    }

    pub fn record_eviction(&self, kind: RegistryKind) {
        self.connection_evictions
            .get_or_create(&PoolLabels::from(kind))
            .inc();
    }

    pub fn update_pool_stats(&self, kind: RegistryKind, total: usize, active: usize) {
        let labels = PoolLabels::from(kind);
        #[allow(clippy::cast_possible_wrap)]
        {
            self.connection_pool_size.get_or_create(&labels).set(total as i64);
            self.connection_pool_active.get_or_create(&labels).set(active as i64);
        }
    }

    /// Refreshes every gauge from a manager snapshot
    pub fn update_from_stats(&self, stats: &ManagerStats) {
        for registry in [&stats.logical, &stats.direct] {
            self.update_pool_stats(registry.kind, registry.total, registry.active);
        }
        #[allow(clippy::cast_possible_wrap)]
        self.streams_active.set(stats.streams as i64);
    }

    pub fn dial_count(&self, kind: RegistryKind, success: bool) -> u64 {
        self.connection_dials
            .get_or_create(&DialLabels::new(kind, success))
            .get()
    }

    pub fn eviction_count(&self, kind: RegistryKind) -> u64 {
        self.connection_evictions
            .get_or_create(&PoolLabels::from(kind))
            .get()
    }
}
