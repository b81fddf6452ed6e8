// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Hotspot user and session management

use serde::Serialize;
use std::sync::Arc;

use super::connection::Connection;
use super::parse::{flag, number, opt_duration, opt_text, text};
use super::stream::StreamHandle;
use super::types::Record;
use crate::error::ClientError;

const USER_PATH: &str = "/ip/hotspot/user";
const ACTIVE_PATH: &str = "/ip/hotspot/active";

/// Entry of `/ip/hotspot/user`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotspotUser {
    pub id: String,
    pub name: String,
    pub profile: String,
    pub server: Option<String>,
    pub mac_address: Option<String>,
    pub comment: Option<String>,
    pub disabled: bool,
    pub uptime_secs: u64,
    pub limit_uptime_secs: Option<u64>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Logged-in session from `/ip/hotspot/active`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotspotSession {
    pub id: String,
    pub user: String,
    pub server: String,
    pub address: String,
    pub mac_address: String,
    pub login_by: String,
    pub uptime_secs: u64,
    pub idle_secs: u64,
    pub session_time_left_secs: Option<u64>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Parameters of a user to create
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewHotspotUser {
    pub name: String,
    pub password: String,
    pub profile: Option<String>,
    pub server: Option<String>,
    /// RouterOS duration, e.g. `1h30m`
    pub limit_uptime: Option<String>,
    pub mac_address: Option<String>,
    pub comment: Option<String>,
}

impl NewHotspotUser {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn with_limit_uptime(mut self, limit: impl Into<String>) -> Self {
        self.limit_uptime = Some(limit.into());
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn words(&self) -> Vec<String> {
        let mut words = vec![
            format!("=name={}", self.name),
            format!("=password={}", self.password),
        ];
        let optional = [
            ("profile", &self.profile),
            ("server", &self.server),
            ("limit-uptime", &self.limit_uptime),
            ("mac-address", &self.mac_address),
            ("comment", &self.comment),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                words.push(format!("={key}={value}"));
            }
        }
        words
    }
}

pub fn parse_user(record: &Record) -> Option<HotspotUser> {
    let id = opt_text(record, ".id")?;
    let name = opt_text(record, "name")?;
    Some(HotspotUser {
        id,
        name,
        profile: record
            .get("profile")
            .cloned()
            .unwrap_or_else(|| "default".to_string()),
        server: opt_text(record, "server"),
        mac_address: opt_text(record, "mac-address"),
        comment: opt_text(record, "comment"),
        disabled: flag(record, "disabled"),
        uptime_secs: opt_duration(record, "uptime").unwrap_or(0),
        limit_uptime_secs: opt_duration(record, "limit-uptime"),
        bytes_in: number(record, "bytes-in"),
        bytes_out: number(record, "bytes-out"),
    })
}

/// Parses one active-session record; `None` for records without an id
pub fn parse_session(record: &Record) -> Option<HotspotSession> {
    Some(HotspotSession {
        id: opt_text(record, ".id")?,
        user: text(record, "user"),
        server: text(record, "server"),
        address: text(record, "address"),
        mac_address: text(record, "mac-address"),
        login_by: text(record, "login-by"),
        uptime_secs: opt_duration(record, "uptime").unwrap_or(0),
        idle_secs: opt_duration(record, "idle-time").unwrap_or(0),
        session_time_left_secs: opt_duration(record, "session-time-left"),
        bytes_in: number(record, "bytes-in"),
        bytes_out: number(record, "bytes-out"),
    })
}

/// Hotspot commands bound to one connection
#[derive(Debug, Clone)]
pub struct HotspotOperations {
    connection: Arc<Connection>,
}

impl HotspotOperations {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    async fn call(&self, command: &str, words: &[String]) -> Result<Vec<Record>, ClientError> {
        let args: Vec<&str> = words.iter().map(String::as_str).collect();
        Ok(self.connection.execute(command, &args).await?)
    }

    pub async fn users(&self) -> Result<Vec<HotspotUser>, ClientError> {
        let records = self.call(&format!("{USER_PATH}/print"), &[]).await?;
        Ok(records.iter().filter_map(parse_user).collect())
    }

    /// Creates a user and returns its `.id`
    pub async fn add_user(&self, user: &NewHotspotUser) -> Result<String, ClientError> {
        tracing::debug!("Adding hotspot user {}", user.name);
        let records = self.call(&format!("{USER_PATH}/add"), &user.words()).await?;
        records
            .iter()
            .find_map(|r| r.get("ret").cloned())
            .ok_or_else(|| ClientError::ProtocolError("add did not return an id".to_string()))
    }

    pub async fn remove_user(&self, id: &str) -> Result<(), ClientError> {
        tracing::debug!("Removing hotspot user {}", id);
        self.call(&format!("{USER_PATH}/remove"), &[format!("=.id={id}")])
            .await?;
        Ok(())
    }

    pub async fn set_user_disabled(&self, id: &str, disabled: bool) -> Result<(), ClientError> {
        let value = if disabled { "yes" } else { "no" };
        self.call(
            &format!("{USER_PATH}/set"),
            &[format!("=.id={id}"), format!("=disabled={value}")],
        )
        .await?;
        Ok(())
    }

    pub async fn active(&self) -> Result<Vec<HotspotSession>, ClientError> {
        let records = self.call(&format!("{ACTIVE_PATH}/print"), &[]).await?;
        Ok(records.iter().filter_map(parse_session).collect())
    }

    /// Logs a session out
    pub async fn kick_active(&self, id: &str) -> Result<(), ClientError> {
        tracing::debug!("Removing hotspot session {}", id);
        self.call(&format!("{ACTIVE_PATH}/remove"), &[format!("=.id={id}")])
            .await?;
        Ok(())
    }

    /// Follows `/ip/hotspot/active`; records parse with [`parse_session`]
    pub fn watch_active(&self) -> StreamHandle {
        self.connection
            .open_stream(&format!("{ACTIVE_PATH}/print"), &["=follow="])
    }
}
