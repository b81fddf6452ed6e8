// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Tag-multiplexed RouterOS session
//!
//! One reader task decodes sentences and routes them by `.tag` to the
//! command or stream that owns the tag. One writer task drains an outbox
//! so any caller can enqueue a sentence without awaiting the socket.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{Reply, Sentence, encode_sentence, read_sentence};
use crate::error::ExecError;
use crate::mikrotik::stream::StreamSink;
use crate::mikrotik::types::Record;

pub(crate) enum Outgoing {
    Sentence(Vec<u8>),
    Close,
}

struct PendingCommand {
    records: Vec<Record>,
    trap: Option<ExecError>,
    reply: oneshot::Sender<Result<Vec<Record>, ExecError>>,
}

enum Route {
    Command(PendingCommand),
    Stream(StreamSink),
}

pub(crate) struct Session {
    outbox: mpsc::UnboundedSender<Outgoing>,
    routes: Mutex<HashMap<String, Route>>,
    alive: AtomicBool,
    next_tag: AtomicU64,
    close_reason: Mutex<Option<String>>,
}

impl Session {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            outbox,
            routes: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
            next_tag: AtomicU64::new(1),
            close_reason: Mutex::new(None),
        });
        (session, rx)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Commands and streams currently waiting for replies
    pub(crate) fn in_flight(&self) -> usize {
        self.routes.lock().len()
    }

    pub(crate) fn next_tag(&self) -> String {
        self.next_tag.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn closed_error(&self) -> ExecError {
        ExecError::Transport(
            self.close_reason()
                .unwrap_or_else(|| "session closed".to_string()),
        )
    }

    /// Queues a sentence for the writer task
    pub(crate) fn send<S: AsRef<str>>(&self, words: &[S]) -> Result<(), ExecError> {
        if !self.is_alive() {
            return Err(self.closed_error());
        }
        self.outbox
            .send(Outgoing::Sentence(encode_sentence(words)))
            .map_err(|_| self.closed_error())
    }

    /// Registers a stream route; fails once the session is dead
    pub(crate) fn register_stream(&self, tag: &str, sink: StreamSink) -> Result<(), ExecError> {
        let mut routes = self.routes.lock();
        // checked under the routes lock so fail_all cannot miss this route
        if !self.is_alive() {
            return Err(self.closed_error());
        }
        routes.insert(tag.to_string(), Route::Stream(sink));
        Ok(())
    }

    /// Drops the route for `tag` and asks the device to stop producing for it
    pub(crate) fn cancel(&self, tag: &str) {
        let removed = self.routes.lock().remove(tag);
        if removed.is_none() {
            return;
        }
        let cancel_tag = self.next_tag();
        let words = [
            "/cancel".to_string(),
            format!("=tag={tag}"),
            format!(".tag={cancel_tag}"),
        ];
        if let Err(e) = self.send(&words) {
            tracing::debug!("Cancel for tag {} not sent: {}", tag, e);
        }
    }

    /// Sends a command and collects every `!re` record until `!done`
    pub(crate) async fn request(
        &self,
        mut words: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<Record>, ExecError> {
        let tag = self.next_tag();
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.routes.lock();
            if !self.is_alive() {
                return Err(self.closed_error());
            }
            routes.insert(
                tag.clone(),
                Route::Command(PendingCommand {
                    records: Vec::new(),
                    trap: None,
                    reply: tx,
                }),
            );
        }
        words.push(format!(".tag={tag}"));
        if let Err(e) = self.send(&words) {
            self.routes.lock().remove(&tag);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                tracing::debug!("Command {:?} timed out after {:?}", words.first(), timeout);
                self.cancel(&tag);
                Err(ExecError::Timeout(timeout))
            }
        }
    }

    /// Routes one reply sentence to its owner
    pub(crate) fn dispatch(&self, sentence: Sentence) {
        // !fatal is usually untagged and always ends the session
        if sentence.reply == Reply::Fatal {
            self.fail_all(&format!("fatal: {}", sentence.reason()));
            return;
        }
        let Some(tag) = sentence.tag.clone() else {
            tracing::trace!("Ignoring untagged {:?} reply", sentence.reply);
            return;
        };

        match sentence.reply {
            Reply::Re => {
                let sink = {
                    let mut routes = self.routes.lock();
                    match routes.get_mut(&tag) {
                        Some(Route::Command(pending)) => {
                            pending.records.push(sentence.attributes);
                            return;
                        }
                        Some(Route::Stream(sink)) => sink.clone(),
                        None => {
                            tracing::trace!("Dropping record for unknown tag {}", tag);
                            return;
                        }
                    }
                };
                sink.deliver(sentence.attributes);
            }
            Reply::Trap => {
                let error = trap_error(&sentence);
                let sink = {
                    let mut routes = self.routes.lock();
                    if let Some(Route::Command(pending)) = routes.get_mut(&tag) {
                        pending.trap = Some(error);
                        return;
                    }
                    match routes.remove(&tag) {
                        Some(Route::Stream(sink)) => sink,
                        _ => {
                            tracing::trace!("Trap for unknown tag {}: {}", tag, error);
                            return;
                        }
                    }
                };
                sink.fail(error);
            }
            Reply::Done | Reply::Empty => {
                let route = self.routes.lock().remove(&tag);
                match route {
                    Some(Route::Command(mut pending)) => {
                        // pre-6.43 login returns its challenge on !done
                        if !sentence.attributes.is_empty() {
                            pending.records.push(sentence.attributes);
                        }
                        let result = match pending.trap {
                            Some(error) => Err(error),
                            None => Ok(pending.records),
                        };
                        let _ = pending.reply.send(result);
                    }
                    Some(Route::Stream(sink)) => sink.end(),
                    None => {}
                }
            }
            Reply::Fatal => {}
            Reply::Unknown(word) => {
                tracing::debug!("Unknown reply word '{}' for tag {}", word, tag);
            }
        }
    }

    /// Marks the session dead and fails every pending route exactly once
    pub(crate) fn fail_all(&self, reason: &str) {
        let drained: Vec<Route> = {
            let mut routes = self.routes.lock();
            if !self.alive.swap(false, Ordering::AcqRel) {
                return;
            }
            *self.close_reason.lock() = Some(reason.to_string());
            routes.drain().map(|(_, route)| route).collect()
        };
        tracing::debug!("Session closed ({}), failing {} route(s)", reason, drained.len());
        for route in drained {
            match route {
                Route::Command(pending) => {
                    let _ = pending
                        .reply
                        .send(Err(ExecError::Transport(reason.to_string())));
                }
                Route::Stream(sink) => sink.fail(ExecError::Transport(reason.to_string())),
            }
        }
        let _ = self.outbox.send(Outgoing::Close);
    }
}

fn trap_error(sentence: &Sentence) -> ExecError {
    ExecError::Trap {
        message: sentence.reason(),
        category: sentence
            .attributes
            .get("category")
            .and_then(|c| c.parse().ok()),
    }
}

/// Reads sentences until the transport fails, then fails the session
pub(crate) async fn read_loop<R>(mut reader: R, session: Arc<Session>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match read_sentence(&mut reader).await {
            Ok(sentence) => {
                session.dispatch(sentence);
                if !session.is_alive() {
                    break session
                        .close_reason()
                        .unwrap_or_else(|| "session closed".to_string());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break "connection closed by device".to_string();
            }
            Err(e) => break format!("read error: {e}"),
        }
    };
    tracing::debug!("Reader stopped: {}", reason);
    session.fail_all(&reason);
}

/// Writes queued sentences; returns the first write error, if any
pub(crate) async fn write_loop<W>(
    mut writer: W,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
    session: Arc<Session>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        match message {
            Outgoing::Sentence(bytes) => {
                let written = async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::debug!("Write failed: {}", e);
                    session.fail_all(&format!("write error: {e}"));
                    return Err(e);
                }
            }
            Outgoing::Close => break,
        }
    }
    writer.shutdown().await
}
