//! Shared utilities for bridge integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::post;
use bytes::Bytes;
use ssh_http_bridge::client::{ClientOptions, Credentials, TunnelClient};
use ssh_http_bridge::config::{BridgeConfig, UserConfig};
use ssh_http_bridge::net::ConnectionTracker;
use ssh_http_bridge::{RouteTableBuilder, Shutdown, TunnelServer};

pub const USER: &str = "deploy";
pub const PASSWORD: &str = "hunter2";

/// A bridge running on an ephemeral port.
pub struct TestBridge {
    pub addr: SocketAddr,
    pub connections: ConnectionTracker,
    shutdown: Shutdown,
}

impl TestBridge {
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config with one password user plus anonymous access.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.ssh.auth_rejection_delay_ms = 10;
    config.auth.allow_anonymous = true;
    config.auth.users.push(UserConfig {
        name: USER.into(),
        password: Some(PASSWORD.into()),
        authorized_keys: vec![],
    });
    config
}

/// `/status`, `/echo` and `/slow` (echo after a short delay).
pub fn test_routes(routes: &mut RouteTableBuilder) {
    routes
        .service("/status", post(|| async { "OK" }))
        .service("/echo", post(|body: Bytes| async move { body }))
        .service(
            "/slow",
            post(|body: Bytes| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                body
            }),
        );
}

pub async fn start_bridge(config: BridgeConfig) -> TestBridge {
    let server = TunnelServer::from_config(&config, test_routes).unwrap();
    let bound = server.bind(&config.listener.bind_address).await.unwrap();
    let addr = bound.local_addr().unwrap();
    let connections = bound.connections();

    let shutdown = Shutdown::new();
    tokio::spawn(bound.serve(shutdown.subscribe()));

    TestBridge {
        addr,
        connections,
        shutdown,
    }
}

pub async fn connect(addr: SocketAddr) -> TunnelClient {
    let options = ClientOptions::new(USER, Credentials::Password(PASSWORD.into()));
    TunnelClient::connect(addr, options).await.unwrap()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
