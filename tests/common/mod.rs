// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! In-memory RouterOS device for integration tests
//!
//! Speaks the API framing over `tokio::io::duplex` and implements just
//! enough of the command tree for the connection layer tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use mikrotik_connector::{
    BoxedTransport, Dialer, Endpoint, Record, Sentence, encode_sentence, read_words,
};
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

pub const PASSWORD: &str = "secret";

enum Out {
    Bytes(Vec<u8>),
    Close,
}

struct Follower {
    path: String,
    tag: String,
    tx: mpsc::UnboundedSender<Out>,
}

#[derive(Default)]
struct DeviceState {
    users: Mutex<Vec<Record>>,
    active: Mutex<Vec<Record>>,
    followers: Mutex<Vec<Follower>>,
    sessions: Mutex<Vec<mpsc::UnboundedSender<Out>>>,
    broken_hosts: Mutex<HashSet<String>>,
    commands: Mutex<Vec<String>>,
    dials: AtomicUsize,
    next_id: AtomicUsize,
    refuse: AtomicBool,
    legacy_login: AtomicBool,
    dial_delay: Mutex<Duration>,
}

/// Fake device reachable through its [`Dialer`] implementation
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<DeviceState>,
}

pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn endpoint(host: &str) -> Endpoint {
    Endpoint::new(host, "admin", PASSWORD)
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.state.next_id.store(1, Ordering::SeqCst);
        device
    }

    pub fn with_user(self, name: &str) -> Self {
        let id = self.allocate_id();
        self.state
            .users
            .lock()
            .unwrap()
            .push(record(&[(".id", id.as_str()), ("name", name), ("profile", "default")]));
        self
    }

    pub fn with_active(self, user: &str, address: &str) -> Self {
        let id = self.allocate_id();
        self.state.active.lock().unwrap().push(record(&[
            (".id", id.as_str()),
            ("user", user),
            ("address", address),
            ("uptime", "1m"),
        ]));
        self
    }

    pub fn with_dial_delay(self, delay: Duration) -> Self {
        *self.state.dial_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_legacy_login(self) -> Self {
        self.state.legacy_login.store(true, Ordering::SeqCst);
        self
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes every write from clients connected to `host` fail
    pub fn break_writes(&self, host: &str) {
        self.state
            .broken_hosts
            .lock()
            .unwrap()
            .insert(host.to_string());
    }

    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn followers(&self) -> usize {
        self.state.followers.lock().unwrap().len()
    }

    fn allocate_id(&self) -> String {
        format!("*{:X}", self.state.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Sends a record to every follower of `path`
    pub fn push(&self, path: &str, record: &Record) {
        for follower in self.state.followers.lock().unwrap().iter() {
            if follower.path == path {
                let _ = follower.tx.send(Out::Bytes(re_sentence(&follower.tag, record)));
            }
        }
    }

    /// Finishes every follow-mode command with `!done`
    pub fn end_followers(&self) {
        for follower in self.state.followers.lock().unwrap().drain(..) {
            let _ = follower
                .tx
                .send(Out::Bytes(encode_sentence(&[
                    "!done".to_string(),
                    format!(".tag={}", follower.tag),
                ])));
        }
    }

    /// Drops every open session as if the device rebooted
    pub fn drop_sessions(&self) {
        self.state.followers.lock().unwrap().clear();
        for session in self.state.sessions.lock().unwrap().drain(..) {
            let _ = session.send(Out::Close);
        }
    }

    fn serve(&self, server: DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(server);
        let (tx, mut rx) = mpsc::unbounded_channel::<Out>();
        self.state.sessions.lock().unwrap().push(tx.clone());

        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Out::Bytes(bytes) => {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Out::Close => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        let device = self.clone();
        tokio::spawn(async move {
            let mut challenge: Option<Vec<u8>> = None;
            while let Ok(words) = read_words(&mut reader).await {
                if !device.handle(&words, &tx, &mut challenge) {
                    break;
                }
            }
        });
    }

    /// Handles one command; returns false when the session should end
    fn handle(
        &self,
        words: &[String],
        tx: &mpsc::UnboundedSender<Out>,
        challenge: &mut Option<Vec<u8>>,
    ) -> bool {
        let command = words[0].clone();
        let parsed = Sentence::from_words(words);
        let tag = parsed.tag.clone().unwrap_or_default();
        let attrs = parsed.attributes;
        self.state.commands.lock().unwrap().push(command.clone());

        let send = |words: &[String]| {
            let _ = tx.send(Out::Bytes(encode_sentence(words)));
        };
        let done = |extra: &[String]| {
            let mut words = vec!["!done".to_string(), format!(".tag={tag}")];
            words.extend_from_slice(extra);
            send(&words);
        };
        let trap = |message: &str| {
            send(&[
                "!trap".to_string(),
                format!(".tag={tag}"),
                format!("=message={message}"),
            ]);
            done(&[]);
        };

        match command.as_str() {
            "/login" => {
                if self.state.legacy_login.load(Ordering::SeqCst) {
                    match (attrs.get("response"), challenge.take()) {
                        (Some(response), Some(c)) => {
                            if *response == legacy_response(PASSWORD, &c) {
                                done(&[]);
                            } else {
                                trap("invalid user name or password (6)");
                            }
                        }
                        _ => {
                            let c = vec![0x11u8; 16];
                            done(&[format!("=ret={}", hex::encode(&c))]);
                            *challenge = Some(c);
                        }
                    }
                } else if attrs.get("password").map(String::as_str) == Some(PASSWORD) {
                    done(&[]);
                } else {
                    trap("invalid user name or password (6)");
                }
            }
            "/quit" => {
                send(&[
                    "!fatal".to_string(),
                    "session terminated on request".to_string(),
                ]);
                let _ = tx.send(Out::Close);
                return false;
            }
            "/cancel" => {
                if let Some(target) = attrs.get("tag") {
                    self.state
                        .followers
                        .lock()
                        .unwrap()
                        .retain(|f| !(f.tag == *target && f.tx.same_channel(tx)));
                    send(&[
                        "!trap".to_string(),
                        format!(".tag={target}"),
                        "=category=2".to_string(),
                        "=message=interrupted".to_string(),
                    ]);
                    send(&["!done".to_string(), format!(".tag={target}")]);
                }
                done(&[]);
            }
            "/system/identity/print" => {
                send(&re_words(&tag, &record(&[("name", "FakeRouter")])));
                done(&[]);
            }
            "/ip/hotspot/user/print" => {
                for user in self.state.users.lock().unwrap().iter() {
                    send(&re_words(&tag, user));
                }
                done(&[]);
            }
            "/ip/hotspot/user/add" => {
                let id = self.allocate_id();
                let mut user = attrs.clone();
                user.insert(".id".to_string(), id.clone());
                self.state.users.lock().unwrap().push(user);
                done(&[format!("=ret={id}")]);
            }
            "/ip/hotspot/user/remove" => {
                let id = attrs.get(".id").cloned().unwrap_or_default();
                let mut users = self.state.users.lock().unwrap();
                let before = users.len();
                users.retain(|u| u.get(".id") != Some(&id));
                let removed = users.len() != before;
                drop(users);
                if removed {
                    done(&[]);
                } else {
                    trap("no such item");
                }
            }
            "/ip/hotspot/active/print" => {
                for session in self.state.active.lock().unwrap().iter() {
                    send(&re_words(&tag, session));
                }
                if attrs.contains_key("follow") {
                    self.state.followers.lock().unwrap().push(Follower {
                        path: command.clone(),
                        tag: tag.clone(),
                        tx: tx.clone(),
                    });
                } else {
                    done(&[]);
                }
            }
            // never answers
            "/tool/sniffer/quick" => {}
            _ => trap("no such command prefix"),
        }
        true
    }
}

fn re_words(tag: &str, record: &Record) -> Vec<String> {
    let mut words = vec!["!re".to_string(), format!(".tag={tag}")];
    for (k, v) in record {
        words.push(format!("={k}={v}"));
    }
    words
}

fn re_sentence(tag: &str, record: &Record) -> Vec<u8> {
    encode_sentence(&re_words(tag, record))
}

/// `00` + hex(md5(0 + password + challenge))
pub fn legacy_response(password: &str, challenge: &[u8]) -> String {
    let mut data = vec![0u8];
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(challenge);
    format!("00{}", hex::encode(md5::compute(&data).0))
}

impl Dialer for FakeDevice {
    fn dial<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            self.state.dials.fetch_add(1, Ordering::SeqCst);
            let delay = *self.state.dial_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.state.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            self.serve(server);
            Ok(Box::new(FlakyTransport {
                inner: client,
                host: endpoint.host.clone(),
                device: Arc::clone(&self.state),
            }) as BoxedTransport)
        })
    }
}

/// Client side of the duplex whose writes fail once its host is broken
struct FlakyTransport {
    inner: DuplexStream,
    host: String,
    device: Arc<DeviceState>,
}

impl FlakyTransport {
    fn broken(&self) -> bool {
        self.device.broken_hosts.lock().unwrap().contains(&self.host)
    }
}

impl AsyncRead for FlakyTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Polls `condition` until it holds or two seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
