// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! One logical RouterOS session
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Dialing -> Connected(Active | Idle) -> Closing -> Closed
//!                    \______________________________________________/
//!                      dial failure, timeout or fatal protocol error
//! ```
//!
//! `Closed` is terminal; a closed connection is replaced, never revived.

mod auth;
mod protocol;
mod session;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use protocol::{Reply, Sentence, encode_length, encode_sentence, read_words};
pub(crate) use session::{Outgoing, Session};

use super::dialer::Dialer;
use super::stream::{StreamHandle, StreamManager};
use super::types::{Endpoint, Record, StreamId};
use crate::error::{ConnectError, ExecError};

/// Command used to ping the session when keep-alive is enabled
const KEEPALIVE_COMMAND: &str = "/system/identity/print";

/// Timing knobs for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Maximum wait for a command reply (30 seconds)
    pub command_timeout: Duration,
    /// Interval between keep-alive pings
    pub keepalive_interval: Duration,
    /// Maximum wait for the session to flush and close
    pub disconnect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Dialing,
    /// Connected with commands or streams in flight
    Active,
    /// Connected with nothing in flight
    Idle,
    Closing,
    Closed,
}

/// Running session plus the tasks serving it
struct Live {
    session: Arc<Session>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    keepalive: Option<JoinHandle<()>>,
}

impl Live {
    /// Sends `/quit`, closes the outbox and waits for the writer to finish
    async fn close(mut self, timeout: Duration) -> Result<(), ExecError> {
        if let Err(e) = self.session.send(&["/quit"]) {
            tracing::trace!("Skipping /quit: {}", e);
        }
        self.session.fail_all("closed by client");
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, writer).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ExecError::Transport(e.to_string())),
            Ok(Err(join)) => Err(ExecError::Transport(join.to_string())),
            Err(_) => Err(ExecError::Timeout(timeout)),
        }
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.session.fail_all("connection dropped");
        self.reader.abort();
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

enum State {
    Disconnected,
    Dialing,
    Connected(Live),
    Closing,
    Closed,
}

/// Resets a dial that never completed (error, timeout or dropped future)
struct DialGuard<'a> {
    state: &'a Mutex<State>,
    armed: bool,
}

impl Drop for DialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if matches!(*state, State::Dialing) {
                *state = State::Closed;
            }
        }
    }
}

/// Authenticated, multiplexed session to one device
pub struct Connection {
    key: String,
    endpoint: Endpoint,
    dialer: Arc<dyn Dialer>,
    settings: ConnectionSettings,
    dial_lock: tokio::sync::Mutex<()>,
    state: Mutex<State>,
    streams: StreamManager,
    last_activity: Mutex<Instant>,
    commands: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("state", &self.peek_state())
            .field("streams", &self.streams.len())
            .finish()
    }
}

impl Connection {
    pub fn new(
        key: impl Into<String>,
        endpoint: Endpoint,
        dialer: Arc<dyn Dialer>,
        settings: ConnectionSettings,
    ) -> Self {
        let key = key.into();
        Self {
            streams: StreamManager::new(key.clone()),
            key,
            endpoint,
            dialer,
            settings,
            dial_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(State::Disconnected),
            last_activity: Mutex::new(Instant::now()),
            commands: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Number of commands issued over this connection
    pub fn commands_issued(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Current state; a session lost underneath is reported as `Closed`
    /// and its tasks are torn down
    pub fn state(&self) -> ConnectionState {
        let mut state = self.state.lock();
        let current = observe(&state);
        if current == ConnectionState::Closed {
            if let State::Connected(live) = &*state {
                let lost = live.session.close_reason().unwrap_or_default();
                tracing::debug!("Connection {} lost: {}", self.key, lost);
            }
            *state = State::Closed;
        }
        current
    }

    /// Same report as [`Connection::state`] without touching the connection
    pub fn peek_state(&self) -> ConnectionState {
        observe(&self.state.lock())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Active | ConnectionState::Idle)
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        match &*self.state.lock() {
            State::Connected(live) if live.session.is_alive() => Some(Arc::clone(&live.session)),
            _ => None,
        }
    }

    /// Connects within the endpoint timeout; no-op when already connected
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.connect_with_timeout(self.endpoint.timeout()).await
    }

    /// Connects, aborting the dial when `timeout` elapses first
    pub async fn connect_with_timeout(&self, timeout: Duration) -> Result<(), ConnectError> {
        let _serial = self.dial_lock.lock().await;
        {
            let mut state = self.state.lock();
            let usable = match &*state {
                State::Connected(live) if live.session.is_alive() => return Ok(()),
                State::Connected(_) | State::Closing | State::Closed => false,
                State::Disconnected | State::Dialing => true,
            };
            if !usable {
                if !matches!(*state, State::Closing) {
                    *state = State::Closed;
                }
                return Err(ConnectError::Closed);
            }
            *state = State::Dialing;
        }
        let mut guard = DialGuard {
            state: &self.state,
            armed: true,
        };

        tracing::debug!("Creating new connection for {}", self.key);
        let live = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(Ok(live)) => live,
            Ok(Err(e)) => {
                tracing::debug!("Connection to {} failed: {}", self.key, e);
                return Err(e);
            }
            Err(_) => {
                tracing::debug!("Connection to {} timed out after {:?}", self.key, timeout);
                return Err(ConnectError::Timeout(timeout));
            }
        };

        let mut state = self.state.lock();
        if !matches!(*state, State::Dialing) {
            // disconnected while dialing; `live` is torn down on drop
            return Err(ConnectError::Closed);
        }
        *state = State::Connected(live);
        guard.armed = false;
        drop(state);
        self.touch();
        tracing::info!("Connected to {} ({})", self.endpoint.socket_addr(), self.key);
        Ok(())
    }

    async fn establish(&self) -> Result<Live, ConnectError> {
        let transport = self
            .dialer
            .dial(&self.endpoint)
            .await
            .map_err(|e| ConnectError::NetworkUnreachable(e.to_string()))?;
        let (reader, writer) = tokio::io::split(transport);
        let (session, outbox) = Session::new();

        let mut live = Live {
            session: Arc::clone(&session),
            reader: tokio::spawn(session::read_loop(reader, Arc::clone(&session))),
            writer: Some(tokio::spawn(session::write_loop(
                writer,
                outbox,
                Arc::clone(&session),
            ))),
            keepalive: None,
        };

        tracing::trace!("Transport established, attempting login");
        session
            .login(
                &self.endpoint.username,
                &self.endpoint.password,
                self.settings.command_timeout,
            )
            .await?;

        if self.endpoint.keep_alive {
            live.keepalive = Some(tokio::spawn(keepalive_loop(
                Arc::clone(&session),
                self.key.clone(),
                self.settings,
            )));
        }
        Ok(live)
    }

    async fn ensure_session(&self) -> Result<Arc<Session>, ExecError> {
        if let Some(session) = self.live_session() {
            return Ok(session);
        }
        self.connect().await.map_err(ExecError::NotConnected)?;
        self.live_session()
            .ok_or(ExecError::NotConnected(ConnectError::Closed))
    }

    /// Runs one command and returns its records
    ///
    /// Connects first when the connection has never been used.
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<Vec<Record>, ExecError> {
        let session = self.ensure_session().await?;
        self.touch();
        self.commands.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Executing {} on {}", command, self.key);
        let result = session
            .request(command_words(command, args), self.settings.command_timeout)
            .await;
        self.touch();
        result
    }

    /// Opens a stream with a generated id; the subscription attaches in the background
    pub fn open_stream(self: &Arc<Self>, command: &str, args: &[&str]) -> StreamHandle {
        let (handle, sink) = self.streams.register(command);
        self.spawn_attach(sink, command, args);
        handle
    }

    /// Opens a stream under a caller-chosen id
    ///
    /// Returns the id back when a live stream already uses it.
    pub fn open_stream_with_id(
        self: &Arc<Self>,
        id: StreamId,
        command: &str,
        args: &[&str],
    ) -> Result<StreamHandle, StreamId> {
        let (handle, sink) = self.streams.register_with_id(id, command)?;
        self.spawn_attach(sink, command, args);
        Ok(handle)
    }

    fn spawn_attach(self: &Arc<Self>, sink: super::stream::StreamSink, command: &str, args: &[&str]) {
        let conn = Arc::clone(self);
        let words = command_words(command, args);
        self.touch();
        tokio::spawn(async move {
            let session = match conn.ensure_session().await {
                Ok(session) => session,
                Err(e) => {
                    sink.fail(e);
                    return;
                }
            };
            let tag = session.next_tag();
            match sink.attach(&session, &tag) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Stream {} stopped before attaching", sink.id());
                    return;
                }
                Err(e) => {
                    sink.fail(e);
                    return;
                }
            }
            let mut words = words;
            words.push(format!(".tag={tag}"));
            if let Err(e) = session.send(&words) {
                session.cancel(&tag);
                sink.fail(e);
                return;
            }
            tracing::debug!("Stream {} attached to {} (tag {})", sink.id(), sink.path(), tag);
        });
    }

    /// Closes the session after stopping every stream it hosts
    ///
    /// Idempotent. The connection ends up `Closed` even when this returns an
    /// error; the error only reports that the transport failed while closing.
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let live = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Closing) {
                State::Connected(live) => live,
                State::Closing => return Ok(()),
                State::Disconnected | State::Dialing | State::Closed => {
                    *state = State::Closed;
                    drop(state);
                    self.streams.stop_all();
                    return Ok(());
                }
            }
        };

        let stopped = self.streams.stop_all();
        tracing::debug!("Disconnecting {} ({} stream(s) stopped)", self.key, stopped);
        let result = live.close(self.settings.disconnect_timeout).await;
        *self.state.lock() = State::Closed;
        match &result {
            Ok(()) => tracing::info!("Disconnected from {}", self.key),
            Err(e) => tracing::warn!("Disconnect from {} was not clean: {}", self.key, e),
        }
        result
    }
}

fn observe(state: &State) -> ConnectionState {
    match state {
        State::Disconnected => ConnectionState::Disconnected,
        State::Dialing => ConnectionState::Dialing,
        State::Closing => ConnectionState::Closing,
        State::Closed => ConnectionState::Closed,
        State::Connected(live) if !live.session.is_alive() => ConnectionState::Closed,
        State::Connected(live) if live.session.in_flight() > 0 => ConnectionState::Active,
        State::Connected(_) => ConnectionState::Idle,
    }
}

/// Builds the command sentence, adding `=` to bare `name=value` arguments
fn command_words(command: &str, args: &[&str]) -> Vec<String> {
    let mut words: Vec<String> = Vec::with_capacity(1 + args.len());
    words.push(command.to_string());
    for a in args {
        if a.starts_with('=') || a.starts_with('?') || a.starts_with('.') {
            words.push((*a).to_string());
        } else {
            words.push(format!("={a}"));
        }
    }
    words
}

async fn keepalive_loop(session: Arc<Session>, key: String, settings: ConnectionSettings) {
    let mut ticker = tokio::time::interval(settings.keepalive_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !session.is_alive() {
            break;
        }
        match session
            .request(vec![KEEPALIVE_COMMAND.to_string()], settings.command_timeout)
            .await
        {
            Ok(_) | Err(ExecError::Trap { .. }) => {
                tracing::trace!("Keep-alive ok for {}", key);
            }
            Err(e) => {
                tracing::warn!("Keep-alive failed for {}: {}", key, e);
                session.fail_all(&format!("keep-alive failed: {e}"));
                break;
            }
        }
    }
}
