//! Routes the bridge binary registers out of the box.

use axum::routing::{post, MethodRouter};
use bytes::Bytes;

use crate::routing::{RouteProvider, RouteTableBuilder};

/// `/status` answers `OK`; `/echo` writes the request body back.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRoutes;

impl RouteProvider for BuiltinRoutes {
    fn prepare_routes(&self, routes: &mut RouteTableBuilder) {
        routes.service("/status", status()).service("/echo", echo());
    }
}

fn status() -> MethodRouter {
    post(|| async { "OK" })
}

fn echo() -> MethodRouter {
    post(|body: Bytes| async move { body })
}
