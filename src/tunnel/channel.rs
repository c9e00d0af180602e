//! Channel handler.
//!
//! Every accepted `session` channel carries exactly one tunneled request:
//!
//! ```text
//! read once (≤ max_payload_bytes)
//!     → decode envelope (routing key)
//!     → build POST <routing key> with the raw payload as body
//!     → route table lookup
//!     → handler writes body through a ResponseRelay
//!     → close
//! ```
//!
//! A short read is taken as the whole message; there is no accumulation loop
//! and the channel is never reused for a second request. There is also no
//! deadline: a stalled peer or handler holds this channel's task, and only
//! this channel's task.

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use tracing::{debug, error, info};

use crate::config::{DecodeFailurePolicy, TunnelConfig};
use crate::http::relay::ResponseRelay;
use crate::http::request::{build_request, TunnelPeer};
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::tunnel::envelope::Envelope;

/// Byte stream the channel handler runs one request/response cycle over.
#[async_trait]
pub trait TunnelChannel: Send {
    /// Read whatever is available into `buf`. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data`, returning how many bytes were taken.
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Close the channel.
    async fn close(&mut self) -> io::Result<()>;
}

/// How a channel's request/response cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Peer closed before sending anything.
    Finished,
    /// Reading the payload failed.
    ReadFailed,
    /// Envelope did not decode and the policy is to abort.
    InvalidEnvelope,
    /// Routing key is not a valid request target.
    InvalidRequest,
    /// No route registered under the routing key.
    MissingRoute,
    /// Handler ran to completion.
    Relayed { bytes: usize },
    /// Handler returned an error.
    HandlerFailed,
    /// Handler panicked.
    HandlerPanicked,
}

impl ChannelOutcome {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelOutcome::Finished => "finished",
            ChannelOutcome::ReadFailed => "read_failed",
            ChannelOutcome::InvalidEnvelope => "invalid_envelope",
            ChannelOutcome::InvalidRequest => "invalid_request",
            ChannelOutcome::MissingRoute => "missing_route",
            ChannelOutcome::Relayed { .. } => "relayed",
            ChannelOutcome::HandlerFailed => "handler_failed",
            ChannelOutcome::HandlerPanicked => "handler_panicked",
        }
    }
}

/// Runs the single request/response cycle for each accepted channel.
///
/// Cheap to clone; one instance is shared by every session.
#[derive(Clone)]
pub struct ChannelHandler {
    routes: Arc<RouteTable>,
    max_payload_bytes: usize,
    on_decode_error: DecodeFailurePolicy,
}

impl ChannelHandler {
    pub fn new(routes: Arc<RouteTable>, config: &TunnelConfig) -> Self {
        Self {
            routes,
            max_payload_bytes: config.max_payload_bytes,
            on_decode_error: config.on_decode_error,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Serve one request on `channel`, then close it.
    ///
    /// The channel is closed on every path, including a panicking handler.
    pub async fn serve<C: TunnelChannel>(
        &self,
        mut channel: C,
        peer: Option<TunnelPeer>,
    ) -> ChannelOutcome {
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.exchange(&mut channel, peer.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Route handler panicked");
                ChannelOutcome::HandlerPanicked
            }
        };

        if let Err(e) = channel.close().await {
            debug!(error = %e, "Channel close failed");
        }

        metrics::record_channel(outcome.as_str(), started);
        debug!(outcome = outcome.as_str(), "Channel done");
        outcome
    }

    async fn exchange<C: TunnelChannel>(
        &self,
        channel: &mut C,
        peer: Option<&TunnelPeer>,
    ) -> ChannelOutcome {
        let mut buf = vec![0u8; self.max_payload_bytes];
        let len = match channel.read(&mut buf).await {
            Ok(0) => {
                info!("Transfer finished");
                return ChannelOutcome::Finished;
            }
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!(error = %e, "Transfer finished");
                return ChannelOutcome::Finished;
            }
            Err(e) => {
                error!(error = %e, "Data error");
                return ChannelOutcome::ReadFailed;
            }
        };
        buf.truncate(len);

        debug!(
            len,
            payload = %String::from_utf8_lossy(&buf),
            "Data to pass on"
        );

        let envelope = match Envelope::decode(&buf) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Missing route: envelope did not decode");
                match self.on_decode_error {
                    DecodeFailurePolicy::Continue => Envelope::default(),
                    DecodeFailurePolicy::Abort => return ChannelOutcome::InvalidEnvelope,
                }
            }
        };
        let route = envelope.route();

        let (request, request_id) = match build_request(route, Bytes::from(buf), peer) {
            Ok(built) => built,
            Err(e) => {
                error!(route, error = %e, "Request construction failed");
                return ChannelOutcome::InvalidRequest;
            }
        };

        let Some(handler) = self.routes.get(route) else {
            error!(route, "Missing route");
            return ChannelOutcome::MissingRoute;
        };

        debug!(route, request_id = %request_id, "Dispatching");

        let mut relay = ResponseRelay::new(channel);
        match handler.serve(request, &mut relay).await {
            Ok(()) => {
                let bytes = relay.bytes_written();
                debug!(route, request_id = %request_id, bytes, "Response relayed");
                ChannelOutcome::Relayed { bytes }
            }
            Err(e) => {
                error!(route, request_id = %request_id, error = %e, "Route handler failed");
                ChannelOutcome::HandlerFailed
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeChannel;
    use super::*;
    use crate::http::relay::ResponseSink;
    use crate::routing::{HandlerError, RouteHandler, RouteTable};
    use axum::http::{Request, StatusCode};

    /// Writes a fixed body in the given chunks.
    struct Chunks(Vec<&'static [u8]>);

    #[async_trait]
    impl RouteHandler for Chunks {
        async fn serve(
            &self,
            _request: Request<Bytes>,
            sink: &mut dyn ResponseSink,
        ) -> Result<(), HandlerError> {
            sink.set_status(StatusCode::OK);
            for chunk in &self.0 {
                sink.write(chunk).await?;
            }
            Ok(())
        }
    }

    /// Writes back the request body it received.
    struct Echo;

    #[async_trait]
    impl RouteHandler for Echo {
        async fn serve(
            &self,
            request: Request<Bytes>,
            sink: &mut dyn ResponseSink,
        ) -> Result<(), HandlerError> {
            sink.write(request.body()).await?;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl RouteHandler for Panics {
        async fn serve(
            &self,
            _request: Request<Bytes>,
            _sink: &mut dyn ResponseSink,
        ) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    fn handler_with(config: TunnelConfig) -> ChannelHandler {
        let routes = RouteTable::builder()
            .handler("/status", Chunks(vec![b"OK"]))
            .handler("/chunks", Chunks(vec![b"a", b"bc", b"def"]))
            .handler("/echo", Echo)
            .handler("/panic", Panics)
            .build()
            .unwrap();
        ChannelHandler::new(Arc::new(routes), &config)
    }

    fn handler() -> ChannelHandler {
        handler_with(TunnelConfig::default())
    }

    #[tokio::test]
    async fn status_route_writes_ok_then_closes() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/status"}"#);
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::Relayed { bytes: 2 });
        assert_eq!(log.body(), b"OK");
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn handler_writes_arrive_in_order() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/chunks"}"#);
        let log = channel.log();

        handler().serve(channel, None).await;

        assert_eq!(
            log.writes(),
            vec![b"a".to_vec(), b"bc".to_vec(), b"def".to_vec()]
        );
    }

    #[tokio::test]
    async fn body_is_the_whole_payload() {
        let payload = r#"{"Value":"/echo","extra":[1,2,3]}"#;
        let channel = FakeChannel::with_payload(payload);
        let log = channel.log();

        handler().serve(channel, None).await;

        assert_eq!(log.body(), payload.as_bytes());
    }

    #[tokio::test]
    async fn missing_route_writes_nothing() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/nope"}"#);
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::MissingRoute);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_continues_to_missing_route() {
        let channel = FakeChannel::with_payload("{not json");
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::MissingRoute);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_aborts_when_configured() {
        let config = TunnelConfig {
            on_decode_error: DecodeFailurePolicy::Abort,
            ..TunnelConfig::default()
        };
        let channel = FakeChannel::with_payload("{not json");
        let log = channel.log();

        let outcome = handler_with(config).serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::InvalidEnvelope);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn empty_stream_is_not_a_data_error() {
        let channel = FakeChannel::new();
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::Finished);
        assert_eq!(log.reads(), 1);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn unexpected_eof_is_treated_as_finished() {
        let channel = FakeChannel::with_read_error(io::ErrorKind::UnexpectedEof);
        let log = channel.log();

        assert_eq!(handler().serve(channel, None).await, ChannelOutcome::Finished);
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn read_error_stops_the_channel() {
        let channel = FakeChannel::with_read_error(io::ErrorKind::ConnectionReset);
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::ReadFailed);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn unrepresentable_target_stops_before_lookup() {
        // Longer than any URI the http crate accepts.
        let route = format!("/{}", "a".repeat(70_000));
        let channel = FakeChannel::with_payload(format!(r#"{{"Value":"{route}"}}"#));
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::InvalidRequest);
        assert!(log.writes().is_empty());
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn keys_that_need_escaping_still_dispatch() {
        let routes = RouteTable::builder()
            .handler("/has space", Chunks(vec![b"spaced"]))
            .handler("api/v1/status", Chunks(vec![b"relative"]))
            .build()
            .unwrap();
        let handler = ChannelHandler::new(Arc::new(routes), &TunnelConfig::default());

        for (payload, body) in [
            (r#"{"Value":"/has space"}"#, &b"spaced"[..]),
            (r#"{"Value":"api/v1/status"}"#, &b"relative"[..]),
        ] {
            let channel = FakeChannel::with_payload(payload);
            let log = channel.log();
            let outcome = handler.serve(channel, None).await;
            assert!(matches!(outcome, ChannelOutcome::Relayed { .. }), "{payload}");
            assert_eq!(log.body(), body);
        }
    }

    #[tokio::test]
    async fn only_one_message_is_read() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/status"}"#)
            .then_payload(r#"{"Value":"/echo"}"#);
        let log = channel.log();

        handler().serve(channel, None).await;

        assert_eq!(log.reads(), 1);
        assert_eq!(log.body(), b"OK");
    }

    #[tokio::test]
    async fn payload_is_cut_at_the_read_ceiling() {
        let config = TunnelConfig {
            max_payload_bytes: 8,
            ..TunnelConfig::default()
        };
        let channel = FakeChannel::with_payload(r#"{"Value":"/status"}"#);
        let log = channel.log();

        // Eight bytes of JSON never decode, so the default policy falls
        // through to a missing route.
        let outcome = handler_with(config).serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::MissingRoute);
        assert!(log.writes().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_a_handler_failure() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/status"}"#).failing_writes();
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::HandlerFailed);
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn panicking_handler_still_closes() {
        let channel = FakeChannel::with_payload(r#"{"Value":"/panic"}"#);
        let log = channel.log();

        let outcome = handler().serve(channel, None).await;

        assert_eq!(outcome, ChannelOutcome::HandlerPanicked);
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn concurrent_channels_stay_separate() {
        let handler = handler();
        let mut tasks = Vec::new();
        let mut logs = Vec::new();

        for n in 0..16 {
            let payload = format!(r#"{{"Value":"/echo","n":{n}}}"#);
            let channel = FakeChannel::with_payload(payload.clone());
            logs.push((payload, channel.log()));
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move { handler.serve(channel, None).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for (payload, log) in logs {
            assert_eq!(log.body(), payload.as_bytes());
            assert_eq!(log.closes(), 1);
        }
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(ChannelOutcome::Relayed { bytes: 3 }.as_str(), "relayed");
        assert_eq!(ChannelOutcome::MissingRoute.as_str(), "missing_route");
    }
}
