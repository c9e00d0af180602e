//! SSH tunnel server: the connection acceptor.
//!
//! # Responsibilities
//! - Bind the listening socket (bind failure is returned, never retried)
//! - Prepare the route table once from the external route provider
//! - Accept connections forever, one session task per connection
//! - Keep going when a single accept or handshake fails

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::validation::MAX_PAYLOAD_CEILING;
use crate::config::{BridgeConfig, TunnelConfig, ValidationError};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::routing::{prepare_routes, RouteProvider, RouteTable};
use crate::ssh::auth::Authenticator;
use crate::ssh::keys::server_config;
use crate::ssh::session::SessionHandler;
use crate::ssh::Error;
use crate::tunnel::channel::ChannelHandler;

const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Bridges SSH channels to route handlers.
pub struct TunnelServer {
    ssh_config: Arc<russh::server::Config>,
    auth: Arc<Authenticator>,
    routes: Arc<dyn RouteProvider>,
    tunnel: TunnelConfig,
    max_connections: usize,
}

impl TunnelServer {
    /// Create a server from a pre-built russh configuration.
    ///
    /// `ssh_config` must advertise the methods `auth` can answer.
    pub fn new(
        ssh_config: Arc<russh::server::Config>,
        auth: Authenticator,
        routes: impl RouteProvider + 'static,
    ) -> Self {
        Self {
            ssh_config,
            auth: Arc::new(auth),
            routes: Arc::new(routes),
            tunnel: TunnelConfig::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Create a server from a validated configuration.
    pub fn from_config(
        config: &BridgeConfig,
        routes: impl RouteProvider + 'static,
    ) -> Result<Self, Error> {
        let auth = Authenticator::from_config(&config.auth);
        let ssh_config = server_config(&config.ssh, &auth)?;

        Self::new(ssh_config, auth, routes)
            .with_tunnel_config(config.tunnel.clone())?
            .with_max_connections(config.listener.max_connections)
    }

    /// Rejects a payload limit of zero or above [`MAX_PAYLOAD_CEILING`].
    pub fn with_tunnel_config(mut self, tunnel: TunnelConfig) -> Result<Self, Error> {
        let size = tunnel.max_payload_bytes;
        if size == 0 || size > MAX_PAYLOAD_CEILING {
            return Err(ValidationError::PayloadSize(size).into());
        }
        self.tunnel = tunnel;
        Ok(self)
    }

    /// Rejects a limit of zero.
    pub fn with_max_connections(mut self, max_connections: usize) -> Result<Self, Error> {
        if max_connections == 0 {
            return Err(ValidationError::MaxConnections.into());
        }
        self.max_connections = max_connections;
        Ok(self)
    }

    /// Bind `address` and prepare routes, ready to serve.
    pub async fn bind(&self, address: &str) -> Result<BoundServer, Error> {
        let listener = Listener::bind(address, self.max_connections).await?;
        self.prepare(listener)
    }

    /// Prepare routes around a socket the caller already bound.
    pub fn attach(&self, listener: TcpListener) -> Result<BoundServer, Error> {
        self.prepare(Listener::from_tcp(listener, self.max_connections)?)
    }

    fn prepare(&self, listener: Listener) -> Result<BoundServer, Error> {
        let routes = Arc::new(prepare_routes(self.routes.as_ref())?);
        info!(routes = ?routes.keys(), "Routes prepared");

        Ok(BoundServer {
            listener,
            ssh_config: Arc::clone(&self.ssh_config),
            auth: Arc::clone(&self.auth),
            channels: ChannelHandler::new(routes, &self.tunnel),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Bind `address` and accept connections for the life of the process.
    ///
    /// Only returns early, with an error, when binding or route preparation
    /// fails.
    pub async fn run(&self, address: &str) -> Result<(), Error> {
        let bound = self.bind(address).await?;
        Self::serve_forever(bound).await;
        Ok(())
    }

    /// Like [`TunnelServer::run`], on an already bound socket.
    pub async fn run_on_listener(&self, listener: TcpListener) -> Result<(), Error> {
        let bound = self.attach(listener)?;
        Self::serve_forever(bound).await;
        Ok(())
    }

    async fn serve_forever(bound: BoundServer) {
        let shutdown = Shutdown::new();
        bound.serve(shutdown.subscribe()).await;
    }
}

/// A bound listener with its frozen route table.
pub struct BoundServer {
    listener: Listener,
    ssh_config: Arc<russh::server::Config>,
    auth: Arc<Authenticator>,
    channels: ChannelHandler,
    tracker: ConnectionTracker,
}

impl BoundServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn routes(&self) -> &RouteTable {
        self.channels.routes()
    }

    /// Tracker for live SSH connections.
    pub fn connections(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires or its sender is dropped.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) {
        info!(address = ?self.local_addr().ok(), "Accepting SSH connections");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Listener stopping");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr, permit)) => self.spawn_session(stream, peer_addr, permit),
                Err(e) => error!(error = %e, "Failed to accept incoming connection"),
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let handler = SessionHandler::new(
            guard.id(),
            peer_addr,
            Arc::clone(&self.auth),
            self.channels.clone(),
        );
        let established = handler.established();
        let ssh_config = Arc::clone(&self.ssh_config);
        let span = tracing::info_span!("session", connection_id = %guard.id(), peer_addr = %peer_addr);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;

                let result = match russh::server::run_stream(ssh_config, stream, handler).await {
                    Ok(session) => session.await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => debug!("Connection closed cleanly"),
                    Err(e) if !established.load(Ordering::SeqCst) => {
                        metrics::record_handshake_failure();
                        error!(error = %e, "Failed to handshake");
                    }
                    Err(e) => warn!(error = %e, "Connection error"),
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::routing::RouteTableBuilder;

    fn server() -> TunnelServer {
        let auth = Authenticator::from_config(&AuthConfig {
            allow_anonymous: true,
            users: vec![],
        });
        let ssh_config = server_config(&Default::default(), &auth).unwrap();
        TunnelServer::new(ssh_config, auth, |routes: &mut RouteTableBuilder| {
            routes.service("/status", axum::routing::post(|| async { "OK" }));
        })
    }

    #[test]
    fn zero_limits_are_refused() {
        let err = server()
            .with_tunnel_config(TunnelConfig {
                max_payload_bytes: 0,
                ..TunnelConfig::default()
            })
            .err()
            .unwrap();
        assert!(matches!(err, Error::Setting(ValidationError::PayloadSize(0))));

        let err = server().with_max_connections(0).err().unwrap();
        assert!(matches!(err, Error::Setting(ValidationError::MaxConnections)));
    }

    #[test]
    fn oversized_payload_limit_is_refused() {
        let result = server().with_tunnel_config(TunnelConfig {
            max_payload_bytes: MAX_PAYLOAD_CEILING + 1,
            ..TunnelConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn valid_limits_are_kept() {
        let server = server()
            .with_tunnel_config(TunnelConfig {
                max_payload_bytes: 4096,
                ..TunnelConfig::default()
            })
            .unwrap()
            .with_max_connections(2)
            .unwrap();
        assert_eq!(server.tunnel.max_payload_bytes, 4096);
        assert_eq!(server.max_connections, 2);
    }

    #[tokio::test]
    async fn attach_keeps_the_callers_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let bound = server().attach(listener).unwrap();
        assert_eq!(bound.local_addr().unwrap(), addr);
        assert_eq!(bound.routes().keys(), vec!["/status"]);
    }
}
