// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Unit tests for the metrics registry

#[cfg(test)]
mod test {
    use crate::metrics::MetricsRegistry;
    use crate::mikrotik::{ManagerStats, RegistryKind, RegistryStats};

    fn stats(logical: (usize, usize), direct: (usize, usize), streams: usize) -> ManagerStats {
        ManagerStats {
            logical: RegistryStats {
                kind: RegistryKind::Logical,
                total: logical.0,
                active: logical.1,
                entries: Vec::new(),
            },
            direct: RegistryStats {
                kind: RegistryKind::Direct,
                total: direct.0,
                active: direct.1,
                entries: Vec::new(),
            },
            streams,
        }
    }

    #[tokio::test]
    async fn test_encode_contains_registered_metrics() {
        let metrics = MetricsRegistry::new();
        metrics.initialize_registry_metrics(RegistryKind::Logical);
        let text = metrics.encode_metrics().await.unwrap();

        assert!(text.contains("mikrotik_connection_pool_size"));
        assert!(text.contains("mikrotik_connection_dials_total"));
        assert!(text.contains("mikrotik_connection_evictions_total"));
        assert!(text.contains("mikrotik_streams_active"));
        assert!(text.contains("registry=\"logical\""));
    }

    #[test]
    fn test_dial_counters_by_result() {
        let metrics = MetricsRegistry::new();
        metrics.record_dial(RegistryKind::Direct, true);
        metrics.record_dial(RegistryKind::Direct, true);
        metrics.record_dial(RegistryKind::Direct, false);

        assert_eq!(metrics.dial_count(RegistryKind::Direct, true), 2);
        assert_eq!(metrics.dial_count(RegistryKind::Direct, false), 1);
        assert_eq!(metrics.dial_count(RegistryKind::Logical, true), 0);
    }

    #[test]
    fn test_eviction_counter() {
        let metrics = MetricsRegistry::new();
        metrics.record_eviction(RegistryKind::Logical);
        assert_eq!(metrics.eviction_count(RegistryKind::Logical), 1);
    }

    #[tokio::test]
    async fn test_update_from_stats_sets_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.update_from_stats(&stats((3, 1), (2, 0), 4));
        let text = metrics.encode_metrics().await.unwrap();

        assert!(text.contains("mikrotik_connection_pool_size{registry=\"logical\"} 3"));
        assert!(text.contains("mikrotik_connection_pool_active{registry=\"logical\"} 1"));
        assert!(text.contains("mikrotik_connection_pool_size{registry=\"direct\"} 2"));
        assert!(text.contains("mikrotik_streams_active 4"));
    }
}
