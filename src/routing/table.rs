//! Route lookup.
//!
//! # Responsibilities
//! - Store handlers by routing key
//! - Look up the handler for a tunneled request
//! - Return an explicit no-match rather than a silent default
//!
//! # Design Decisions
//! - Built once at startup, immutable afterwards (shared via Arc, no locks)
//! - Exact key match, O(1)
//! - Registration is delegated to a `RouteProvider` owned by the embedding
//!   application

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::routing::handler::{RouteHandler, ServiceHandler};

/// Route registration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route key must not be empty")]
    EmptyKey,
    #[error("route `{0}` registered twice")]
    Duplicate(String),
}

/// Immutable map from routing key to handler.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Look up the handler for `key`.
    pub fn get(&self, key: &str) -> Option<&dyn RouteHandler> {
        self.routes.get(key).map(|handler| handler.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable").field("routes", &self.keys()).finish()
    }
}

/// Collects routes before the table is frozen.
#[derive(Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
    error: Option<RouteError>,
}

impl RouteTableBuilder {
    /// Register `handler` under `key`.
    pub fn handler<H>(&mut self, key: impl Into<String>, handler: H) -> &mut Self
    where
        H: RouteHandler + 'static,
    {
        let key = key.into();
        if self.error.is_some() {
            return self;
        }
        if key.is_empty() {
            self.error = Some(RouteError::EmptyKey);
        } else if self.routes.contains_key(&key) {
            self.error = Some(RouteError::Duplicate(key));
        } else {
            self.routes.insert(key, Arc::new(handler));
        }
        self
    }

    /// Register a tower HTTP service (e.g. an axum `MethodRouter`) under `key`.
    pub fn service<S>(&mut self, key: impl Into<String>, service: S) -> &mut Self
    where
        ServiceHandler<S>: RouteHandler + 'static,
    {
        self.handler(key, ServiceHandler::new(service))
    }

    /// Freeze the registered routes. Reports the first registration error.
    pub fn build(&mut self) -> Result<RouteTable, RouteError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        Ok(RouteTable {
            routes: std::mem::take(&mut self.routes),
        })
    }
}

/// Externally owned route registration ("prepare routes").
pub trait RouteProvider: Send + Sync {
    fn prepare_routes(&self, routes: &mut RouteTableBuilder);
}

impl<F> RouteProvider for F
where
    F: Fn(&mut RouteTableBuilder) + Send + Sync,
{
    fn prepare_routes(&self, routes: &mut RouteTableBuilder) {
        self(routes)
    }
}

/// Build a frozen table from a provider.
pub fn prepare_routes(provider: &dyn RouteProvider) -> Result<RouteTable, RouteError> {
    let mut builder = RouteTable::builder();
    provider.prepare_routes(&mut builder);
    builder.build()
}
