// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! # MikroTik Connector
//!
//! Connection management for MikroTik RouterOS devices.
//!
//! This library dials, authenticates, caches and tears down RouterOS API
//! sessions, runs commands over them and keeps long-lived streaming
//! subscriptions alive until they are stopped.
//!
//! ## Main modules
//! - `api`: HTTP operational endpoints
//! - `config`: configuration management
//! - `error`: error types
//! - `metrics`: Prometheus metrics registry
//! - `mikrotik`: RouterOS connections, registries and streams
//! - `supervisor`: idle sweeps and shutdown handling
//! - `prelude`: commonly used types and traits

mod api;
mod config;
mod error;
mod metrics;
mod mikrotik;
pub mod prelude;
mod supervisor;

// Re-export commonly used types
/// Application configuration
pub use config::{Config, DeviceConfig};

/// Error types and result alias
pub use error::{AppError, ClientError, ConnectError, CreateError, ExecError, Result};

/// HTTP API router and state
pub use api::{AppState, create_router};

/// Supervisor task and process-wide shutdown signal
pub use supervisor::{
    DrainOutcome, SupervisorSettings, drain_with_timeout, shutdown_signal, start_supervisor, trigger_shutdown,
};

/// Metrics registry and labels
pub use metrics::{DialLabels, MetricsRegistry, PoolLabels};

/// Connection manager, registries and streams
pub use mikrotik::{
    BoxedTransport, Connection, ConnectionManager, ConnectionRegistry, ConnectionSettings,
    ConnectionState, Dialer, EndpointResolver, EntryStats, ManagerStats, RegistryStats,
    StaticResolver, StreamEvent, StreamHandle, StreamListener, StreamManager, StreamState,
    StreamStopper, TcpDialer, Transport, is_dead_record,
};

/// Device addressing
pub use mikrotik::{
    DEFAULT_API_PORT, DEFAULT_TIMEOUT_SECS, Endpoint, Identity, Record, RegistryKind, StreamId,
};

/// Hotspot and PPP operations
pub use mikrotik::{
    HotspotOperations, HotspotSession, HotspotUser, NewHotspotUser, NewPppSecret, PppOperations,
    PppSecret, PppSession, parse_uptime_to_seconds, parsers,
};

/// RouterOS wire protocol framing (public for tests and custom transports)
pub use mikrotik::{Reply, Sentence, encode_length, encode_sentence, read_words};
