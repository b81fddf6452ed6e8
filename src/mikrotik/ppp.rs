// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! PPP secrets and active sessions

use serde::Serialize;
use std::sync::Arc;

use super::connection::Connection;
use super::parse::{flag, opt_duration, opt_text, text};
use super::stream::StreamHandle;
use super::types::Record;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PppSecret {
    pub id: String,
    pub name: String,
    pub service: String,
    pub profile: String,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PppSession {
    pub id: String,
    pub name: String,
    pub service: String,
    pub caller_id: String,
    pub address: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewPppSecret {
    pub name: String,
    pub password: String,
    /// `any`, `pppoe`, `pptp`, `l2tp` ...
    pub service: Option<String>,
    pub profile: Option<String>,
    pub remote_address: Option<String>,
    pub comment: Option<String>,
}

impl NewPppSecret {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    fn words(&self) -> Vec<String> {
        let mut words = vec![
            format!("=name={}", self.name),
            format!("=password={}", self.password),
        ];
        for (key, value) in [
            ("service", &self.service),
            ("profile", &self.profile),
            ("remote-address", &self.remote_address),
            ("comment", &self.comment),
        ] {
            if let Some(value) = value {
                words.push(format!("={key}={value}"));
            }
        }
        words
    }
}

pub fn parse_secret(record: &Record) -> Option<PppSecret> {
    Some(PppSecret {
        id: opt_text(record, ".id")?,
        name: opt_text(record, "name")?,
        service: record
            .get("service")
            .cloned()
            .unwrap_or_else(|| "any".to_string()),
        profile: record
            .get("profile")
            .cloned()
            .unwrap_or_else(|| "default".to_string()),
        local_address: opt_text(record, "local-address"),
        remote_address: opt_text(record, "remote-address"),
        comment: opt_text(record, "comment"),
        disabled: flag(record, "disabled"),
    })
}

pub fn parse_session(record: &Record) -> Option<PppSession> {
    Some(PppSession {
        id: opt_text(record, ".id")?,
        name: text(record, "name"),
        service: text(record, "service"),
        caller_id: text(record, "caller-id"),
        address: text(record, "address"),
        uptime_secs: opt_duration(record, "uptime").unwrap_or(0),
    })
}

/// PPP commands bound to one connection
#[derive(Debug, Clone)]
pub struct PppOperations {
    connection: Arc<Connection>,
}

impl PppOperations {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn secrets(&self) -> Result<Vec<PppSecret>, ClientError> {
        let records = self.connection.execute("/ppp/secret/print", &[]).await?;
        Ok(records.iter().filter_map(parse_secret).collect())
    }

    /// Creates a secret and returns its `.id`
    pub async fn add_secret(&self, secret: &NewPppSecret) -> Result<String, ClientError> {
        tracing::debug!("Adding PPP secret {}", secret.name);
        let words = secret.words();
        let args: Vec<&str> = words.iter().map(String::as_str).collect();
        let records = self.connection.execute("/ppp/secret/add", &args).await?;
        records
            .iter()
            .find_map(|r| r.get("ret").cloned())
            .ok_or_else(|| ClientError::ProtocolError("add did not return an id".to_string()))
    }

    pub async fn remove_secret(&self, id: &str) -> Result<(), ClientError> {
        tracing::debug!("Removing PPP secret {}", id);
        let arg = format!("=.id={id}");
        self.connection
            .execute("/ppp/secret/remove", &[arg.as_str()])
            .await?;
        Ok(())
    }

    pub async fn active(&self) -> Result<Vec<PppSession>, ClientError> {
        let records = self.connection.execute("/ppp/active/print", &[]).await?;
        Ok(records.iter().filter_map(parse_session).collect())
    }

    /// Follows `/ppp/active`; records parse with [`parse_session`]
    pub fn watch_active(&self) -> StreamHandle {
        self.connection
            .open_stream("/ppp/active/print", &["=follow="])
    }
}
