//! Response relay.
//!
//! Route handlers write their output into a [`ResponseSink`]. On the tunnel
//! the sink is a [`ResponseRelay`], which forwards body bytes straight to the
//! originating SSH channel. Status codes and headers have nowhere to go: the
//! tunnel carries body bytes only, so the relay accepts and drops them.

use std::io;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::observability::metrics;
use crate::tunnel::channel::TunnelChannel;

/// Output capability handed to route handlers.
#[async_trait]
pub trait ResponseSink: Send {
    /// Record the response status.
    fn set_status(&mut self, status: StatusCode);

    /// Record a response header.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Write a chunk of the response body, returning the bytes accepted.
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// Sink that relays body writes onto a tunnel channel.
///
/// `set_status` and `set_header` are no-ops on this sink.
pub struct ResponseRelay<'a, C: TunnelChannel> {
    channel: &'a mut C,
    bytes_written: usize,
}

impl<'a, C: TunnelChannel> ResponseRelay<'a, C> {
    pub fn new(channel: &'a mut C) -> Self {
        Self {
            channel,
            bytes_written: 0,
        }
    }

    /// Body bytes successfully written to the channel so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

#[async_trait]
impl<'a, C: TunnelChannel> ResponseSink for ResponseRelay<'a, C> {
    fn set_status(&mut self, status: StatusCode) {
        tracing::trace!(%status, "Status not relayed over tunnel");
    }

    fn set_header(&mut self, name: HeaderName, _value: HeaderValue) {
        tracing::trace!(header = %name, "Header not relayed over tunnel");
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        tracing::trace!(len = data.len(), "Sending back bytes");

        let written = self.channel.write(data).await?;
        self.bytes_written += written;
        metrics::record_bytes_relayed(written);
        Ok(written)
    }
}

/// Sink that keeps everything a handler produced, metadata included.
///
/// Handy for exercising route handlers outside a tunnel.
#[derive(Debug, Default)]
pub struct CapturedResponse {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[async_trait]
impl ResponseSink for CapturedResponse {
    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}
