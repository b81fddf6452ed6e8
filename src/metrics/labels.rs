// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Label types for Prometheus metrics

use prometheus_client::encoding::EncodeLabelSet;

use crate::mikrotik::RegistryKind;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolLabels {
    pub registry: String,
}

impl From<RegistryKind> for PoolLabels {
    fn from(kind: RegistryKind) -> Self {
        Self {
            registry: kind.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DialLabels {
    pub registry: String,
    /// `success` or `failure`
    pub result: String,
}

impl DialLabels {
    pub fn new(kind: RegistryKind, success: bool) -> Self {
        Self {
            registry: kind.to_string(),
            result: if success { "success" } else { "failure" }.to_string(),
        }
    }
}
