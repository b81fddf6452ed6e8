// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Keyed cache of live connections
//!
//! At most one entry exists per key. Dials are single-flight: concurrent
//! callers asking for the same missing key share one dial and all receive
//! the same connection or the same error.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::connection::{Connection, ConnectionSettings, ConnectionState};
use super::dialer::Dialer;
use super::types::{Endpoint, RegistryKind, StreamId};
use crate::error::{ConnectError, CreateError};
use crate::metrics::MetricsRegistry;

type DialFuture = Shared<BoxFuture<'static, Result<Arc<Connection>, CreateError>>>;

struct CacheEntry {
    connection: Arc<Connection>,
    last_used: Instant,
}

impl CacheEntry {
    /// Time since the entry was handed out or its connection last did work
    fn idle_for(&self) -> Duration {
        let last = self.last_used.max(self.connection.last_activity());
        last.elapsed()
    }
}

struct InFlight {
    endpoint: Endpoint,
    dial: DialFuture,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
    closed: bool,
}

struct Inner {
    kind: RegistryKind,
    dialer: Arc<dyn Dialer>,
    settings: ConnectionSettings,
    state: Mutex<RegistryState>,
    metrics: Option<MetricsRegistry>,
}

/// Snapshot of one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub kind: RegistryKind,
    pub identifier: String,
    pub idle_secs: u64,
    pub is_connected: bool,
    pub state: ConnectionState,
    pub streams: usize,
}

/// Snapshot of a whole registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub kind: RegistryKind,
    pub total: usize,
    /// Entries with commands or streams in flight
    pub active: usize,
    pub entries: Vec<EntryStats>,
}

/// Connection cache for one addressing kind
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(
        kind: RegistryKind,
        dialer: Arc<dyn Dialer>,
        settings: ConnectionSettings,
        metrics: Option<MetricsRegistry>,
    ) -> Self {
        if let Some(metrics) = &metrics {
            metrics.initialize_registry_metrics(kind);
        }
        Self {
            inner: Arc::new(Inner {
                kind,
                dialer,
                settings,
                state: Mutex::new(RegistryState::default()),
                metrics,
            }),
        }
    }

    pub fn kind(&self) -> RegistryKind {
        self.inner.kind
    }

    /// Returns the live connection for `key`, dialing one when needed
    ///
    /// A cached connection created for a different endpoint (changed host or
    /// credentials) is evicted and replaced.
    pub async fn get_or_create(
        &self,
        key: &str,
        endpoint: &Endpoint,
    ) -> Result<Arc<Connection>, CreateError> {
        tracing::trace!("Requesting {} connection for key: {}", self.inner.kind, key);
        loop {
            let (dial, replaced, joined) = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(CreateError::DialFailed(ConnectError::Closed));
                }

                let mut replaced = None;
                if let Some(entry) = state.entries.get_mut(key) {
                    let connected = entry.connection.is_connected();
                    if connected && entry.connection.endpoint() == endpoint {
                        tracing::debug!("Reusing cached connection for {}", key);
                        entry.last_used = Instant::now();
                        return Ok(Arc::clone(&entry.connection));
                    }
                    if connected {
                        tracing::debug!("Endpoint changed for {}, replacing connection", key);
                    } else {
                        tracing::debug!("Cached connection for {} is closed, removing", key);
                    }
                    replaced = state.entries.remove(key).map(|e| e.connection);
                }

                match state.in_flight.get(key) {
                    Some(flight) => (
                        flight.dial.clone(),
                        replaced,
                        Some(flight.endpoint == *endpoint),
                    ),
                    None => {
                        let dial = self.dial(key, endpoint.clone());
                        state.in_flight.insert(
                            key.to_string(),
                            InFlight {
                                endpoint: endpoint.clone(),
                                dial: dial.clone(),
                            },
                        );
                        (dial, replaced, None)
                    }
                }
            };

            if let Some(old) = replaced {
                self.retire(key, old).await;
            }

            match joined {
                // joined a dial for the same endpoint: share its outcome
                Some(true) => {
                    tracing::debug!("Joining in-flight dial for {}", key);
                    return dial.await;
                }
                // a dial for an older endpoint is running: let it land, then replace it
                Some(false) => {
                    let _ = dial.await;
                }
                None => return dial.await,
            }
        }
    }

    fn dial(&self, key: &str, endpoint: Endpoint) -> DialFuture {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            tracing::debug!("Creating new {} connection for {}", inner.kind, key);
            let connection = Arc::new(Connection::new(
                key.clone(),
                endpoint,
                Arc::clone(&inner.dialer),
                inner.settings,
            ));
            let result = connection.connect().await;
            if let Some(metrics) = &inner.metrics {
                metrics.record_dial(inner.kind, result.is_ok());
            }

            let mut state = inner.state.lock().await;
            state.in_flight.remove(&key);
            if let Err(e) = result {
                tracing::warn!("Failed to connect {}: {}", key, e);
                return Err(CreateError::DialFailed(e));
            }
            if state.closed {
                drop(state);
                tracing::debug!("Registry closed while dialing {}, discarding", key);
                if let Err(e) = connection.disconnect().await {
                    tracing::debug!("Discarded connection {} did not close cleanly: {}", key, e);
                }
                return Err(CreateError::DialFailed(ConnectError::Closed));
            }
            state.entries.insert(
                key,
                CacheEntry {
                    connection: Arc::clone(&connection),
                    last_used: Instant::now(),
                },
            );
            Ok(connection)
        }
        .boxed()
        .shared()
    }

    /// Pure lookup: never dials, `None` unless the cached connection is live
    pub async fn get_cached(&self, key: &str) -> Option<Arc<Connection>> {
        let stale = {
            let mut state = self.inner.state.lock().await;
            let connected = state.entries.get(key)?.connection.is_connected();
            if connected {
                return state.entries.get(key).map(|e| Arc::clone(&e.connection));
            }
            state.entries.remove(key).map(|e| e.connection)
        };
        if let Some(old) = stale {
            tracing::debug!("Purging closed connection for {}", key);
            self.retire(key, old).await;
        }
        None
    }

    pub async fn is_connected(&self, key: &str) -> bool {
        let state = self.inner.state.lock().await;
        state
            .entries
            .get(key)
            .is_some_and(|e| e.connection.is_connected())
    }

    /// Removes the entry and disconnects it; returns false for unknown keys
    pub async fn evict(&self, key: &str) -> bool {
        let removed = self.inner.state.lock().await.entries.remove(key);
        match removed {
            Some(entry) => {
                self.retire(key, entry.connection).await;
                true
            }
            None => {
                tracing::trace!("Nothing to evict for {}", key);
                false
            }
        }
    }

    /// Disconnects a connection already removed from the map
    async fn retire(&self, key: &str, connection: Arc<Connection>) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_eviction(self.inner.kind);
        }
        match connection.disconnect().await {
            Ok(()) => tracing::debug!("Evicted connection {}", key),
            Err(e) => tracing::warn!("Error while disconnecting {}: {}", key, e),
        }
    }

    /// Evicts entries idle for longer than `ttl` or no longer connected
    ///
    /// Entries with live streams are kept while their connection is up.
    /// Returns the number of evicted entries.
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let expired: Vec<(String, Arc<Connection>)> = {
            let mut state = self.inner.state.lock().await;
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(key, entry)| {
                    if !entry.connection.is_connected() {
                        tracing::debug!("Sweeping closed connection: {}", key);
                        return true;
                    }
                    let idle = entry.idle_for();
                    if idle < ttl {
                        return false;
                    }
                    if !entry.connection.streams().is_empty() {
                        tracing::trace!("Keeping idle connection {} with live streams", key);
                        return false;
                    }
                    tracing::debug!("Sweeping idle connection: {} (idle {:?})", key, idle);
                    true
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    let entry = state.entries.remove(&key)?;
                    Some((key, entry.connection))
                })
                .collect()
        };
        self.retire_all(expired).await
    }

    /// Evicts every entry and refuses new dials
    pub async fn drain(&self) -> usize {
        let all: Vec<(String, Arc<Connection>)> = {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            state.entries.drain().map(|(k, e)| (k, e.connection)).collect()
        };
        tracing::info!("Draining {} {} connection(s)", all.len(), self.inner.kind);
        self.retire_all(all).await
    }

    /// Disconnects each connection on its own task so one failure cannot stop the rest
    async fn retire_all(&self, connections: Vec<(String, Arc<Connection>)>) -> usize {
        let count = connections.len();
        let mut handles = Vec::with_capacity(count);
        for (key, connection) in connections {
            let registry = self.clone();
            handles.push(tokio::spawn(async move {
                registry.retire(&key, connection).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Eviction task failed: {}", e);
            }
        }
        count
    }

    /// Stops stream `id` on whichever cached connection hosts it
    pub async fn stop_stream(&self, id: &StreamId) -> bool {
        let hosts: Vec<Arc<Connection>> = {
            let state = self.inner.state.lock().await;
            state
                .entries
                .values()
                .filter(|e| e.connection.streams().contains(id))
                .map(|e| Arc::clone(&e.connection))
                .collect()
        };
        hosts.iter().filter(|c| c.streams().stop(id)).count() > 0
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.inner.state.lock().await;
        let mut entries: Vec<EntryStats> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let connection_state = entry.connection.peek_state();
                EntryStats {
                    kind: self.inner.kind,
                    identifier: key.clone(),
                    idle_secs: entry.idle_for().as_secs(),
                    is_connected: matches!(
                        connection_state,
                        ConnectionState::Active | ConnectionState::Idle
                    ),
                    state: connection_state,
                    streams: entry.connection.streams().len(),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        RegistryStats {
            kind: self.inner.kind,
            total: entries.len(),
            active: entries
                .iter()
                .filter(|e| e.state == ConnectionState::Active)
                .count(),
            entries,
        }
    }
}
