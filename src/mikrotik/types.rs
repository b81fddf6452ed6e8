// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Type definitions shared by the connection layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Default RouterOS API port
pub const DEFAULT_API_PORT: u16 = 8728;

/// Default dial timeout (10 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One decoded `!re` reply: attribute name to value
pub type Record = HashMap<String, String>;

/// Identity and credentials of one remote device
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Endpoint {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_API_PORT,
            username: username.into(),
            password: password.into(),
            keep_alive: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Cache key for direct addressing: `host:port:user`
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.username)
    }

    /// Socket address string, bracketing bare IPv6 hosts
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validates endpoint fields
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err(format!("Invalid port 0 for host '{}'", self.host));
        }
        if self.username.trim().is_empty() {
            return Err(format!("Username cannot be empty for host '{}'", self.host));
        }
        if self.timeout_secs == 0 {
            return Err(format!("Timeout must be positive for host '{}'", self.host));
        }
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_alive", &self.keep_alive)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// How a caller addresses a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Opaque id (e.g. a database row id), resolved to an [`Endpoint`]
    Logical(String),
    /// Endpoint given directly, keyed by `host:port:user`
    Direct(Endpoint),
}

impl Identity {
    pub fn logical(id: impl Into<String>) -> Self {
        Self::Logical(id.into())
    }

    pub fn kind(&self) -> RegistryKind {
        match self {
            Self::Logical(_) => RegistryKind::Logical,
            Self::Direct(_) => RegistryKind::Direct,
        }
    }

    /// Key inside the registry for this identity's kind
    pub fn cache_key(&self) -> String {
        match self {
            Self::Logical(id) => id.clone(),
            Self::Direct(endpoint) => endpoint.cache_key(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(id) => write!(f, "id:{id}"),
            Self::Direct(endpoint) => write!(f, "{}", endpoint.cache_key()),
        }
    }
}

/// Which registry an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Logical,
    Direct,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical => f.write_str("logical"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// Identifier of a stream subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
