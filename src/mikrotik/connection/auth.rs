// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! RouterOS authentication

use md5::compute as md5_compute;
use std::time::Duration;

use super::session::Session;
use crate::error::{ConnectError, ExecError};

/// Builds the legacy challenge response: `00` + hex(md5(0 + password + challenge))
pub(crate) fn challenge_response(password: &str, challenge_hex: &str) -> Result<String, ConnectError> {
    let challenge = hex::decode(challenge_hex)
        .map_err(|e| ConnectError::AuthFailed(format!("malformed login challenge: {e}")))?;
    let mut data = Vec::with_capacity(1 + password.len() + challenge.len());
    data.push(0u8);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(&challenge);
    let digest = md5_compute(&data);
    let mut response = String::from("00");
    response.push_str(&hex::encode(digest.0));
    Ok(response)
}

fn login_error(error: ExecError) -> ConnectError {
    match error {
        ExecError::Trap { message, .. } => ConnectError::AuthFailed(message),
        ExecError::Timeout(t) => ConnectError::Timeout(t),
        other => ConnectError::NetworkUnreachable(other.to_string()),
    }
}

impl Session {
    /// Logs in, falling back to the pre-6.43 challenge/response exchange
    pub(crate) async fn login(
        &self,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        tracing::trace!("Attempting login for user: {}", username);
        let records = self
            .request(
                vec![
                    "/login".to_string(),
                    format!("=name={username}"),
                    format!("=password={password}"),
                ],
                timeout,
            )
            .await
            .map_err(login_error)?;

        for r in &records {
            if let Some(msg) = r.get("message") {
                if msg.contains("failure") || msg.contains("invalid") {
                    tracing::trace!("Login failed with message: {}", msg);
                    return Err(ConnectError::AuthFailed(msg.clone()));
                }
                tracing::debug!("Login message: {}", msg);
            }
        }

        // Older RouterOS ignores the password and answers with a challenge
        let Some(challenge_hex) = records.iter().find_map(|r| r.get("ret")) else {
            tracing::debug!("Login successful (plain method)");
            return Ok(());
        };
        tracing::trace!("Challenge received, length: {}", challenge_hex.len());
        let response = challenge_response(password, challenge_hex)?;

        self.request(
            vec![
                "/login".to_string(),
                format!("=name={username}"),
                format!("=response={response}"),
            ],
            timeout,
        )
        .await
        .map_err(login_error)?;
        tracing::debug!("Login successful (legacy method)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_response_format() {
        let response = challenge_response("", "00000000000000000000000000000000").unwrap();
        assert_eq!(response.len(), 34);
        assert!(response.starts_with("00"));
    }

    #[test]
    fn test_challenge_response_known_digest() {
        // md5 of the single byte 0x00 followed by an empty password and empty challenge
        let response = challenge_response("", "").unwrap();
        assert_eq!(response, "0093b885adfe0da089cdf634904fd59f71");
    }

    #[test]
    fn test_challenge_response_rejects_bad_hex() {
        let err = challenge_response("x", "zz").unwrap_err();
        assert!(matches!(err, ConnectError::AuthFailed(_)));
    }

    #[test]
    fn test_trap_during_login_is_auth_failure() {
        let err = login_error(ExecError::Trap {
            message: "invalid user name or password (6)".to_string(),
            category: None,
        });
        assert_eq!(
            err,
            ConnectError::AuthFailed("invalid user name or password (6)".to_string())
        );
    }
}
