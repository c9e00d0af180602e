//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
    /// The connection limiter was shut down.
    #[error("Connection limiter closed")]
    Closed,
    /// A limit of zero would block every accept.
    #[error("max_connections must be greater than zero")]
    NoCapacity,
}

/// Split `host:port`. The host may be empty; the port must be numeric.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host, port))
}

/// Resolve `address` to its first IPv4 socket address.
pub async fn resolve_ipv4(address: &str) -> Result<SocketAddr, ListenerError> {
    let invalid = |reason: &str| {
        ListenerError::Bind(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{address}: {reason}"),
        ))
    };

    let (host, port) = split_host_port(address).ok_or_else(|| invalid("expected host:port"))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };

    let mut addrs = lookup_host((host, port)).await.map_err(ListenerError::Bind)?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| invalid("no IPv4 address"))
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to `address` (`host:port`) with the given connection limit.
    ///
    /// Host names are resolved and only IPv4 addresses are used. An empty
    /// host binds every interface.
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let addr = resolve_ipv4(address).await?;
        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_tcp(listener, max_connections)
    }

    /// Wrap a socket the caller already bound.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        if max_connections == 0 {
            return Err(ListenerError::NoCapacity);
        }
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Waits while the limit is reached. The returned permit must be held for
    /// the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool, even if
/// the session task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_rejects_unparsable_address() {
        let err = Listener::bind("localhost-ish", 4).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
    }

    #[tokio::test]
    async fn bind_resolves_host_names_to_ipv4() {
        let listener = Listener::bind("localhost:0", 4).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.is_ipv4());
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn empty_host_binds_all_interfaces() {
        let listener = Listener::bind(":0", 4).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_unspecified());
    }

    #[tokio::test]
    async fn ipv6_only_address_is_refused() {
        let err = Listener::bind("[::1]:0", 4).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
    }

    #[tokio::test]
    async fn zero_capacity_is_refused() {
        let err = Listener::bind("127.0.0.1:0", 0).await.unwrap_err();
        assert!(matches!(err, ListenerError::NoCapacity));
    }

    #[tokio::test]
    async fn wraps_existing_socket() {
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let listener = Listener::from_tcp(socket, 1).unwrap();
        assert_eq!(listener.local_addr().unwrap(), addr);
        assert_eq!(listener.available_permits(), 1);
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("localhost:2222"), Some(("localhost", 2222)));
        assert_eq!(split_host_port(":22"), Some(("", 22)));
        assert_eq!(split_host_port("0.0.0.0:99999"), None);
        assert_eq!(split_host_port("no-port"), None);
    }

    #[tokio::test]
    async fn permits_track_open_connections() {
        let listener = Listener::bind("127.0.0.1:0", 2).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.max_connections(), 2);

        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }
}
