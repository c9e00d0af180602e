//! Startup orchestration.
//!
//! Order: metrics exporter, SSH server (host key, routes, listener), then the
//! accept loop. Any failure before the accept loop starts is fatal.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::BridgeConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::routing::RouteProvider;
use crate::ssh::{self, TunnelServer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address {address:?}")]
    MetricsAddress { address: String },

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Ssh(#[from] ssh::Error),
}

/// Run the bridge until SIGINT or SIGTERM.
pub async fn run(
    config: BridgeConfig,
    routes: impl RouteProvider + 'static,
) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress {
                address: config.observability.metrics_address.clone(),
            })?;
        metrics::init_metrics(address)?;
    }

    let server = TunnelServer::from_config(&config, routes)?;
    let bound = server.bind(&config.listener.bind_address).await?;
    let connections = bound.connections();

    let shutdown = Shutdown::new();
    let acceptor = tokio::spawn(bound.serve(shutdown.subscribe()));

    signals::wait_for_signal().await;
    shutdown.trigger();
    let _ = acceptor.await;

    tracing::info!(
        active_sessions = connections.active_count(),
        "Shutdown complete"
    );
    Ok(())
}
