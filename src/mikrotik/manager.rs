// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Entry point used by the rest of the application
//!
//! Owns one registry per addressing kind and maps every failure onto
//! [`ClientError`].

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::connection::{Connection, ConnectionSettings};
use super::dialer::Dialer;
use super::hotspot::HotspotOperations;
use super::ppp::PppOperations;
use super::registry::{ConnectionRegistry, RegistryStats};
use super::stream::StreamHandle;
use super::types::{Endpoint, Identity, Record, RegistryKind, StreamId};
use crate::error::{ClientError, CreateError};
use crate::metrics::MetricsRegistry;

/// Looks up the endpoint behind a logical device id
pub trait EndpointResolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<Endpoint>>;
}

/// In-memory resolver backed by a map
#[derive(Debug, Default)]
pub struct StaticResolver {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.write().insert(id.into(), endpoint);
    }

    pub fn remove(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Endpoint)> for StaticResolver {
    fn from_iter<I: IntoIterator<Item = (S, Endpoint)>>(entries: I) -> Self {
        Self {
            endpoints: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

impl EndpointResolver for StaticResolver {
    fn resolve<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<Endpoint>> {
        let endpoint = self.endpoints.read().get(id).cloned();
        Box::pin(async move { endpoint })
    }
}

/// Snapshot of both registries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub logical: RegistryStats,
    pub direct: RegistryStats,
    /// Live streams across every cached connection
    pub streams: usize,
}

/// Who holds a stream id
enum Slot {
    /// Reserved while a subscription is being set up
    Pending,
    Owned(Weak<Connection>),
}

impl Slot {
    fn is_live(&self, id: &StreamId) -> bool {
        match self {
            Self::Pending => true,
            Self::Owned(owner) => owner
                .upgrade()
                .is_some_and(|c| c.streams().contains(id)),
        }
    }
}

type Subscriptions = Mutex<HashMap<StreamId, Slot>>;

/// Releases a reserved id unless the subscription was installed
struct Reservation<'a> {
    subscriptions: &'a Subscriptions,
    id: StreamId,
    installed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.installed {
            return;
        }
        let mut subscriptions = self.subscriptions.lock();
        if matches!(subscriptions.get(&self.id), Some(Slot::Pending)) {
            subscriptions.remove(&self.id);
        }
    }
}

pub struct ConnectionManager {
    logical: ConnectionRegistry,
    direct: ConnectionRegistry,
    resolver: Arc<dyn EndpointResolver>,
    subscriptions: Subscriptions,
}

impl ConnectionManager {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        resolver: Arc<dyn EndpointResolver>,
        settings: ConnectionSettings,
        metrics: Option<MetricsRegistry>,
    ) -> Self {
        Self {
            logical: ConnectionRegistry::new(
                RegistryKind::Logical,
                Arc::clone(&dialer),
                settings,
                metrics.clone(),
            ),
            direct: ConnectionRegistry::new(RegistryKind::Direct, dialer, settings, metrics),
            resolver,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self, kind: RegistryKind) -> &ConnectionRegistry {
        match kind {
            RegistryKind::Logical => &self.logical,
            RegistryKind::Direct => &self.direct,
        }
    }

    /// Returns a live connection for `identity`, dialing if necessary
    pub async fn acquire(&self, identity: &Identity) -> Result<Arc<Connection>, ClientError> {
        match identity {
            Identity::Logical(id) => {
                let endpoint = self
                    .resolver
                    .resolve(id)
                    .await
                    .ok_or_else(|| CreateError::MissingConfig(id.clone()))?;
                Ok(self.logical.get_or_create(id, &endpoint).await?)
            }
            Identity::Direct(endpoint) => {
                endpoint
                    .validate()
                    .map_err(|e| ClientError::DialFailed(format!("invalid endpoint: {e}")))?;
                Ok(self
                    .direct
                    .get_or_create(&endpoint.cache_key(), endpoint)
                    .await?)
            }
        }
    }

    /// Runs one command against the device
    pub async fn run(
        &self,
        identity: &Identity,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<Record>, ClientError> {
        let connection = self.acquire(identity).await?;
        Ok(connection.execute(command, args).await?)
    }

    /// Opens a stream under a generated id
    pub async fn subscribe(
        &self,
        identity: &Identity,
        command: &str,
        args: &[&str],
    ) -> Result<StreamHandle, ClientError> {
        let connection = self.acquire(identity).await?;
        let handle = connection.open_stream(command, args);
        self.index(handle.id().clone(), &connection);
        Ok(handle)
    }

    /// Opens a stream under a caller-chosen id
    ///
    /// Fails with `AlreadySubscribed` while a stream with the same id is live
    /// or being set up on any connection.
    pub async fn subscribe_with_id(
        &self,
        identity: &Identity,
        id: impl Into<StreamId>,
        command: &str,
        args: &[&str],
    ) -> Result<StreamHandle, ClientError> {
        let mut reservation = self.reserve(id.into())?;
        let connection = self.acquire(identity).await?;
        let handle = connection
            .open_stream_with_id(reservation.id.clone(), command, args)
            .map_err(|id| ClientError::AlreadySubscribed(id.to_string()))?;
        self.subscriptions.lock().insert(
            handle.id().clone(),
            Slot::Owned(Arc::downgrade(&connection)),
        );
        reservation.installed = true;
        Ok(handle)
    }

    /// Claims `id` in the same critical section that checks it is free
    fn reserve(&self, id: StreamId) -> Result<Reservation<'_>, ClientError> {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|id, slot| slot.is_live(id));
        if subscriptions.contains_key(&id) {
            return Err(ClientError::AlreadySubscribed(id.to_string()));
        }
        subscriptions.insert(id.clone(), Slot::Pending);
        Ok(Reservation {
            subscriptions: &self.subscriptions,
            id,
            installed: false,
        })
    }

    fn index(&self, id: StreamId, connection: &Arc<Connection>) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|id, slot| slot.is_live(id));
        subscriptions.insert(id, Slot::Owned(Arc::downgrade(connection)));
    }

    /// Stops a stream by id; unknown or finished ids are a no-op
    ///
    /// Streams opened straight on a connection, such as
    /// [`HotspotOperations::watch_active`], are looked up on the cached
    /// connections.
    pub async fn unsubscribe(&self, id: &StreamId) -> bool {
        let owner = {
            let mut subscriptions = self.subscriptions.lock();
            match subscriptions.remove(id) {
                Some(Slot::Owned(owner)) => owner.upgrade(),
                Some(Slot::Pending) => {
                    subscriptions.insert(id.clone(), Slot::Pending);
                    None
                }
                None => None,
            }
        };
        if owner.is_some_and(|connection| connection.streams().stop(id)) {
            return true;
        }
        let (logical, direct) =
            tokio::join!(self.logical.stop_stream(id), self.direct.stop_stream(id));
        if !(logical || direct) {
            tracing::trace!("Unsubscribe for unknown stream {}", id);
        }
        logical || direct
    }

    /// Cached live connection for `identity`; never dials
    pub async fn get_cached(&self, identity: &Identity) -> Option<Arc<Connection>> {
        match identity {
            Identity::Logical(id) => self.logical.get_cached(id).await,
            Identity::Direct(endpoint) => self.direct.get_cached(&endpoint.cache_key()).await,
        }
    }

    pub async fn is_connected(&self, identity: &Identity) -> bool {
        self.registry(identity.kind())
            .is_connected(&identity.cache_key())
            .await
    }

    /// Evicts and disconnects the cached connection for `identity`
    pub async fn evict(&self, identity: &Identity) -> bool {
        self.registry(identity.kind())
            .evict(&identity.cache_key())
            .await
    }

    /// Evicts idle or dead connections from both registries
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let (logical, direct) = tokio::join!(self.logical.sweep(ttl), self.direct.sweep(ttl));
        self.prune();
        logical + direct
    }

    /// Disconnects everything; later acquisitions fail
    pub async fn shutdown(&self) -> usize {
        let (logical, direct) = tokio::join!(self.logical.drain(), self.direct.drain());
        self.subscriptions.lock().clear();
        logical + direct
    }

    fn prune(&self) {
        self.subscriptions.lock().retain(|id, slot| slot.is_live(id));
    }

    pub async fn stats(&self) -> ManagerStats {
        let (logical, direct) = tokio::join!(self.logical.stats(), self.direct.stats());
        let streams = logical
            .entries
            .iter()
            .chain(direct.entries.iter())
            .map(|e| e.streams)
            .sum();
        ManagerStats {
            logical,
            direct,
            streams,
        }
    }

    /// Hotspot operations on the device behind `identity`
    pub async fn hotspot(&self, identity: &Identity) -> Result<HotspotOperations, ClientError> {
        Ok(HotspotOperations::new(self.acquire(identity).await?))
    }

    /// PPP operations on the device behind `identity`
    pub async fn ppp(&self, identity: &Identity) -> Result<PppOperations, ClientError> {
        Ok(PppOperations::new(self.acquire(identity).await?))
    }
}
