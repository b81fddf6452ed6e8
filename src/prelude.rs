// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for convenient use.
//! Users of the library can import everything they need with:
//!
//! ```rust
//! use mikrotik_connector::prelude::*;
//! ```

// Core types
pub use crate::config::{Config, DeviceConfig};
pub use crate::error::{AppError, ClientError, Result};

// Metrics types
pub use crate::metrics::MetricsRegistry;

// Connection layer
pub use crate::mikrotik::{
    Connection, ConnectionManager, ConnectionSettings, Endpoint, EndpointResolver,
    HotspotOperations, Identity, PppOperations, Record, StaticResolver, StreamEvent, StreamHandle,
    StreamId, StreamListener, TcpDialer,
};

// Lifecycle
pub use crate::supervisor::{shutdown_signal, start_supervisor};
