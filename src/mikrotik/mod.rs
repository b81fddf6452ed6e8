// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! `MikroTik` `RouterOS` API connection layer
//!
//! This module dials and authenticates `RouterOS` API sessions, multiplexes
//! commands and streams over them, and caches them per device.

mod connection;
mod dialer;
mod hotspot;
mod manager;
mod parse;
mod ppp;
mod registry;
mod stream;
mod types;

// Re-export public types and functions
pub use connection::{
    Connection, ConnectionSettings, ConnectionState, Reply, Sentence, encode_length,
    encode_sentence, read_words,
};
pub use dialer::{BoxedTransport, Dialer, TcpDialer, Transport};
pub use hotspot::{HotspotOperations, HotspotSession, HotspotUser, NewHotspotUser};
pub use manager::{ConnectionManager, EndpointResolver, ManagerStats, StaticResolver};
pub use parse::parse_uptime_to_seconds;
pub use ppp::{NewPppSecret, PppOperations, PppSecret, PppSession};
pub use registry::{ConnectionRegistry, EntryStats, RegistryStats};
pub use stream::{
    StreamEvent, StreamHandle, StreamListener, StreamManager, StreamState, StreamStopper,
    is_dead_record,
};
pub use types::{
    DEFAULT_API_PORT, DEFAULT_TIMEOUT_SECS, Endpoint, Identity, Record, RegistryKind, StreamId,
};

/// Record parsers for stream consumers
pub mod parsers {
    pub use super::hotspot::{parse_session as parse_hotspot_session, parse_user as parse_hotspot_user};
    pub use super::ppp::{parse_secret as parse_ppp_secret, parse_session as parse_ppp_session};
}
