// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Long-lived subscriptions (`=follow=`, `/listen`, `/tool/torch` ...)
//!
//! A stream moves through `Pending -> Active -> {Ended | Errored | Stopped}`.
//! Records reach the consumer through an unbounded channel in transport
//! order. Once `stop()` has run, nothing more is yielded, including records
//! that were already buffered.

use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::Session;
use super::types::{Record, StreamId};
use crate::error::ExecError;

/// One notification from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Record),
    Error(ExecError),
    End,
}

/// Externally visible stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Pending,
    Active,
    Ended,
    Errored,
    Stopped,
}

/// Returns true for the cleanup markers RouterOS emits in follow mode
pub fn is_dead_record(record: &Record) -> bool {
    record
        .get(".dead")
        .is_some_and(|v| v == "yes" || v == "true")
}

enum Phase {
    Pending {
        events: mpsc::UnboundedSender<StreamEvent>,
    },
    Active {
        events: mpsc::UnboundedSender<StreamEvent>,
        session: Arc<Session>,
        tag: String,
    },
    Ended,
    Errored,
    Stopped,
}

impl Phase {
    fn state(&self) -> StreamState {
        match self {
            Self::Pending { .. } => StreamState::Pending,
            Self::Active { .. } => StreamState::Active,
            Self::Ended => StreamState::Ended,
            Self::Errored => StreamState::Errored,
            Self::Stopped => StreamState::Stopped,
        }
    }
}

type ActiveSet = Mutex<HashMap<StreamId, Arc<StreamShared>>>;

pub(crate) struct StreamShared {
    id: StreamId,
    path: String,
    phase: Mutex<Phase>,
    stopped: AtomicBool,
    active: Weak<ActiveSet>,
}

impl std::fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamShared")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Sending side of a stream, held by the session route table
pub(crate) type StreamSink = Arc<StreamShared>;

impl StreamShared {
    pub(crate) fn id(&self) -> &StreamId {
        &self.id
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    fn state(&self) -> StreamState {
        self.phase.lock().state()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn unlist(&self) {
        if let Some(active) = self.active.upgrade() {
            active.lock().remove(&self.id);
        }
    }

    /// Binds the stream to a session tag unless it was stopped meanwhile
    ///
    /// Returns `Ok(false)` when a buffered stop intent won the race.
    pub(crate) fn attach(self: &Arc<Self>, session: &Arc<Session>, tag: &str) -> Result<bool, ExecError> {
        let mut phase = self.phase.lock();
        let events = match &*phase {
            Phase::Pending { events } => events.clone(),
            _ => return Ok(false),
        };
        // stream state lock is always taken before the session route lock
        session.register_stream(tag, Arc::clone(self))?;
        *phase = Phase::Active {
            events,
            session: Arc::clone(session),
            tag: tag.to_string(),
        };
        Ok(true)
    }

    /// Forwards one record unless it is a dead marker or the stream is over
    pub(crate) fn deliver(&self, record: Record) {
        if is_dead_record(&record) {
            tracing::trace!("Suppressing dead record on stream {}", self.id);
            return;
        }
        let phase = self.phase.lock();
        if let Phase::Active { events, .. } = &*phase {
            let _ = events.send(StreamEvent::Data(record));
        }
    }

    fn finish(&self, event: StreamEvent, terminal: Phase) {
        {
            let mut phase = self.phase.lock();
            match &*phase {
                Phase::Pending { events } | Phase::Active { events, .. } => {
                    let _ = events.send(event);
                }
                _ => return,
            }
            // dropping the sender closes the channel after the terminal event
            *phase = terminal;
        }
        self.unlist();
    }

    /// Upstream finished (`!done`)
    pub(crate) fn end(&self) {
        tracing::debug!("Stream {} ended", self.id);
        self.finish(StreamEvent::End, Phase::Ended);
    }

    /// Upstream failed (`!trap`, lost session, failed attach)
    pub(crate) fn fail(&self, error: ExecError) {
        tracing::debug!("Stream {} failed: {}", self.id, error);
        self.finish(StreamEvent::Error(error), Phase::Errored);
    }

    /// Idempotent; returns true when this call did the stopping
    pub(crate) fn stop(&self) -> bool {
        let stopped_now = {
            let mut phase = self.phase.lock();
            self.stopped.store(true, Ordering::Release);
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Active { session, tag, .. } => {
                    session.cancel(&tag);
                    true
                }
                Phase::Pending { .. } => true,
                finished @ (Phase::Ended | Phase::Errored) => {
                    *phase = finished;
                    false
                }
                Phase::Stopped => false,
            }
        };
        self.unlist();
        if stopped_now {
            tracing::debug!("Stream {} stopped", self.id);
        }
        stopped_now
    }
}

/// Consumer side of a stream
///
/// Dropping the handle stops the stream.
pub struct StreamHandle {
    shared: Arc<StreamShared>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("path", &self.shared.path)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl StreamHandle {
    pub fn id(&self) -> &StreamId {
        &self.shared.id
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Stops the stream; safe to call any number of times in any state
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Cloneable stop control for use from another task
    pub fn stopper(&self) -> StreamStopper {
        StreamStopper {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Next event; `None` once the stream is over or stopped
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.shared.is_stopped() {
            return None;
        }
        let event = self.events.recv().await?;
        if self.shared.is_stopped() {
            return None;
        }
        Some(event)
    }

    /// Drives `listener` on a background task until the stream finishes
    pub fn listen<L>(mut self, mut listener: L) -> JoinHandle<()>
    where
        L: StreamListener,
    {
        tokio::spawn(async move {
            while let Some(event) = self.next().await {
                match event {
                    StreamEvent::Data(record) => listener.on_data(record),
                    StreamEvent::Error(error) => listener.on_error(error),
                    StreamEvent::End => listener.on_end(),
                }
            }
        })
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.shared.is_stopped() {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.shared.is_stopped() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Stops a stream without owning its handle
#[derive(Clone)]
pub struct StreamStopper {
    shared: Arc<StreamShared>,
}

impl StreamStopper {
    pub fn id(&self) -> &StreamId {
        &self.shared.id
    }

    pub fn stop(&self) {
        self.shared.stop();
    }
}

/// Callback interface for consumers that prefer listeners over polling
pub trait StreamListener: Send + 'static {
    fn on_data(&mut self, record: Record);

    fn on_error(&mut self, error: ExecError) {
        tracing::debug!("Stream error: {}", error);
    }

    fn on_end(&mut self) {}
}

/// Active subscriptions owned by one connection
pub struct StreamManager {
    active: Arc<ActiveSet>,
    prefix: String,
    seq: AtomicU64,
}

impl StreamManager {
    /// `prefix` namespaces generated ids, usually the connection key
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            prefix: prefix.into(),
            seq: AtomicU64::new(1),
        }
    }

    /// Registers a `Pending` stream under a freshly generated id
    pub(crate) fn register(&self, path: &str) -> (StreamHandle, StreamSink) {
        let mut active = self.active.lock();
        let id = loop {
            let n = self.seq.fetch_add(1, Ordering::Relaxed);
            let candidate = StreamId::new(format!("{}#{}", self.prefix, n));
            if !active.contains_key(&candidate) {
                break candidate;
            }
        };
        self.insert(&mut active, id, path)
    }

    /// Registers a `Pending` stream under `id`
    ///
    /// Fails with the conflicting id when `id` is already live.
    pub(crate) fn register_with_id(
        &self,
        id: StreamId,
        path: &str,
    ) -> Result<(StreamHandle, StreamSink), StreamId> {
        let mut active = self.active.lock();
        if active.contains_key(&id) {
            return Err(id);
        }
        Ok(self.insert(&mut active, id, path))
    }

    fn insert(
        &self,
        active: &mut HashMap<StreamId, Arc<StreamShared>>,
        id: StreamId,
        path: &str,
    ) -> (StreamHandle, StreamSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(StreamShared {
            id: id.clone(),
            path: path.to_string(),
            phase: Mutex::new(Phase::Pending { events: tx }),
            stopped: AtomicBool::new(false),
            active: Arc::downgrade(&self.active),
        });
        active.insert(id, Arc::clone(&shared));
        (
            StreamHandle {
                shared: Arc::clone(&shared),
                events: rx,
            },
            shared,
        )
    }

    /// Stops one stream; unknown ids are a silent no-op
    pub fn stop(&self, id: &StreamId) -> bool {
        let shared = self.active.lock().get(id).cloned();
        shared.is_some_and(|s| s.stop())
    }

    /// Stops every stream, returning how many were live
    pub fn stop_all(&self) -> usize {
        let streams: Vec<Arc<StreamShared>> = self.active.lock().values().cloned().collect();
        streams.into_iter().filter(|s| s.stop()).count()
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.active.lock().contains_key(id)
    }

    pub fn state(&self, id: &StreamId) -> Option<StreamState> {
        self.active.lock().get(id).map(|s| s.state())
    }

    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mikrotik::connection::Outgoing;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn attached(manager: &StreamManager) -> (StreamHandle, StreamSink, Arc<Session>, mpsc::UnboundedReceiver<Outgoing>) {
        let (handle, sink) = manager.register("/ip/hotspot/active/print");
        let (session, outbox) = Session::new();
        assert!(sink.attach(&session, "5").unwrap());
        (handle, sink, session, outbox)
    }

    #[test]
    fn test_dead_record_detection() {
        assert!(is_dead_record(&record(&[(".dead", "yes")])));
        assert!(is_dead_record(&record(&[(".dead", "true")])));
        assert!(!is_dead_record(&record(&[(".dead", "no")])));
        assert!(!is_dead_record(&record(&[("name", "x")])));
    }

    #[test]
    fn test_generated_ids_are_unique_and_prefixed() {
        let manager = StreamManager::new("r1");
        let (a, _) = manager.register("/a");
        let (b, _) = manager.register("/b");
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("r1#"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_duplicate_explicit_id_is_rejected() {
        let manager = StreamManager::new("r1");
        let (_h, _) = manager.register_with_id("sock-1".into(), "/a").unwrap();
        let err = manager.register_with_id("sock-1".into(), "/a").unwrap_err();
        assert_eq!(err.as_str(), "sock-1");
    }

    #[tokio::test]
    async fn test_records_delivered_in_order_and_dead_suppressed() {
        let manager = StreamManager::new("r1");
        let (mut handle, sink, _session, _outbox) = attached(&manager);

        sink.deliver(record(&[("user", "a")]));
        sink.deliver(record(&[(".id", "*1"), (".dead", "yes")]));
        sink.deliver(record(&[("user", "b")]));
        sink.end();

        assert_eq!(handle.next().await, Some(StreamEvent::Data(record(&[("user", "a")]))));
        assert_eq!(handle.next().await, Some(StreamEvent::Data(record(&[("user", "b")]))));
        assert_eq!(handle.next().await, Some(StreamEvent::End));
        assert_eq!(handle.next().await, None);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_discards_buffered_records() {
        let manager = StreamManager::new("r1");
        let (mut handle, sink, session, mut outbox) = attached(&manager);
        sink.deliver(record(&[("user", "a")]));

        assert!(manager.stop(handle.id()));
        assert!(!manager.stop(handle.id()));
        handle.stop();

        sink.deliver(record(&[("user", "late")]));
        assert_eq!(handle.next().await, None);
        assert_eq!(handle.state(), StreamState::Stopped);
        assert_eq!(session.in_flight(), 0);

        let Some(Outgoing::Sentence(bytes)) = outbox.recv().await else {
            panic!("expected cancel");
        };
        assert!(String::from_utf8_lossy(&bytes).contains("=tag=5"));
    }

    #[tokio::test]
    async fn test_stop_while_pending_prevents_attach() {
        let manager = StreamManager::new("r1");
        let (mut handle, sink) = manager.register("/listen");
        handle.stop();

        let (session, _outbox) = Session::new();
        assert!(!sink.attach(&session, "9").unwrap());
        assert_eq!(session.in_flight(), 0);
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_error_notified_once() {
        let manager = StreamManager::new("r1");
        let (mut handle, sink, _session, _outbox) = attached(&manager);

        sink.fail(ExecError::Transport("gone".to_string()));
        sink.fail(ExecError::Transport("again".to_string()));
        sink.end();

        assert_eq!(
            handle.next().await,
            Some(StreamEvent::Error(ExecError::Transport("gone".to_string())))
        );
        assert_eq!(handle.next().await, None);
        assert_eq!(handle.state(), StreamState::Errored);
        // stop after the stream ended is a no-op
        handle.stop();
        assert_eq!(handle.state(), StreamState::Errored);
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_stream() {
        let manager = StreamManager::new("r1");
        let (a, _) = manager.register("/a");
        let (b, _) = manager.register("/b");
        assert_eq!(manager.stop_all(), 2);
        assert!(manager.is_empty());
        assert_eq!(a.state(), StreamState::Stopped);
        assert_eq!(b.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_listener_receives_callbacks() {
        struct Collect(mpsc::UnboundedSender<String>);
        impl StreamListener for Collect {
            fn on_data(&mut self, record: Record) {
                let _ = self.0.send(record["user"].clone());
            }
            fn on_end(&mut self) {
                let _ = self.0.send("<end>".to_string());
            }
        }

        let manager = StreamManager::new("r1");
        let (handle, sink, _session, _outbox) = attached(&manager);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = handle.listen(Collect(tx));

        sink.deliver(record(&[("user", "a")]));
        sink.end();
        task.await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("<end>"));
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_stream() {
        let manager = StreamManager::new("r1");
        let (handle, _sink, session, _outbox) = attached(&manager);
        drop(handle);
        assert!(manager.is_empty());
        assert_eq!(session.in_flight(), 0);
    }
}
