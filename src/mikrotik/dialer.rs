// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Transport dialing
//!
//! The connection layer talks to a byte stream; where that stream comes
//! from is decided by a [`Dialer`]. Production uses TCP, tests plug in
//! in-memory devices.

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::types::Endpoint;

/// Bidirectional byte stream to a device
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens transports to endpoints
pub trait Dialer: Send + Sync + 'static {
    fn dial<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, std::io::Result<BoxedTransport>>;
}

/// Plain TCP dialer (RouterOS API service, port 8728 by default)
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, std::io::Result<BoxedTransport>> {
        Box::pin(async move {
            let addr = endpoint.socket_addr();
            tracing::trace!("Attempting TCP connection to: {}", addr);
            let stream = TcpStream::connect(&addr).await?;
            stream.set_nodelay(true)?;
            tracing::trace!("TCP connection established to: {}", addr);
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}
