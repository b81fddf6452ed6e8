// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Error types for the RouterOS connection layer

use std::time::Duration;
use thiserror::Error;

/// Failure to establish a session with a device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Dial or login did not finish in time
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Device rejected the credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Socket could not be opened or broke during login
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The connection was already shut down and cannot be reused
    #[error("connection is closed")]
    Closed,
}

/// Failure of a single command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The connection could not be (re)established
    #[error("not connected: {0}")]
    NotConnected(ConnectError),

    /// Device answered with `!trap`; the session stays usable
    #[error("RouterOS trap: {message}")]
    Trap {
        message: String,
        category: Option<u32>,
    },

    /// Transport broke while the command was in flight
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply within the allowed time
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to obtain a pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    /// No endpoint configuration is known for the key
    #[error("no endpoint configuration for '{0}'")]
    MissingConfig(String),

    #[error("dial failed: {0}")]
    DialFailed(#[from] ConnectError),
}

/// Error surfaced to collaborators through [`crate::ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("operation timed out")]
    Timeout,

    #[error("stream '{0}' is already subscribed")]
    AlreadySubscribed(String),
}

impl From<ConnectError> for ClientError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Timeout(_) => Self::Timeout,
            other => Self::DialFailed(other.to_string()),
        }
    }
}

impl From<CreateError> for ClientError {
    fn from(error: CreateError) -> Self {
        match error {
            CreateError::MissingConfig(key) => Self::NotFound(key),
            CreateError::DialFailed(e) => e.into(),
        }
    }
}

impl From<ExecError> for ClientError {
    fn from(error: ExecError) -> Self {
        match error {
            ExecError::NotConnected(e) => e.into(),
            ExecError::Trap { message, .. } => Self::ProtocolError(message),
            ExecError::Transport(msg) => Self::DialFailed(msg),
            ExecError::Timeout(_) => Self::Timeout,
        }
    }
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or IO error
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// RouterOS client error
    #[error("RouterOS error: {0}")]
    Client(#[from] ClientError),

    /// Address parsing error
    #[error("Address parse error")]
    AddrParse(#[from] std::net::AddrParseError),
}

/// Convenient alias for Result with application error
pub type Result<T> = std::result::Result<T, AppError>;
