//! Synthetic request construction.
//!
//! # Responsibilities
//! - Generate a unique request ID per tunneled request
//! - Turn a routing key and raw channel payload into a `POST` request
//! - Attach the tunnel peer so handlers can see who called them
//!
//! # Design Decisions
//! - The body is the full raw payload, envelope framing included
//! - Request ID added as early as possible for tracing

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Method, Request, Uri};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::net::ConnectionId;

/// Header carrying the per-request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Bytes escaped when a routing key becomes a request target. `%` and `?`
/// pass through so pre-encoded keys and query strings survive.
const TARGET_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// The routing key exactly as the envelope carried it.
///
/// The request URI is an escaped, origin-form rendering of the key; handlers
/// that need the original text read it from the extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey(pub String);

/// Unique identifier for one tunneled request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh UUID v4 request ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The SSH connection a tunneled request arrived on.
///
/// Inserted into every synthetic request's extensions, next to an axum
/// `ConnectInfo<SocketAddr>` for the remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPeer {
    pub connection_id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub user: Option<String>,
}

/// Origin-form target for `route`: relative keys gain a leading `/` and
/// characters not allowed in a URI are percent-encoded. An empty key
/// targets `/`.
pub fn request_target(route: &str) -> Result<Uri, axum::http::Error> {
    if route.is_empty() {
        return Ok(Uri::default());
    }
    let encoded = utf8_percent_encode(route, TARGET_ESCAPES).to_string();
    let target = if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    };
    Ok(Uri::try_from(target)?)
}

/// Build the `POST` request dispatched for one channel payload.
pub fn build_request(
    route: &str,
    payload: Bytes,
    peer: Option<&TunnelPeer>,
) -> Result<(Request<Bytes>, RequestId), axum::http::Error> {
    let uri = request_target(route)?;

    let request_id = RequestId::new();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_LENGTH, payload.len())
        .header(X_REQUEST_ID, HeaderValue::try_from(request_id.as_str())?)
        .extension(RoutingKey(route.to_string()));

    if let Some(peer) = peer {
        builder = builder
            .extension(peer.clone())
            .extension(ConnectInfo(peer.remote_addr));
    }

    Ok((builder.body(payload)?, request_id))
}
