//! SSH transport subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP stream
//!     → server.rs (session task per connection)
//!     → keys.rs + auth.rs (handshake, credential checks)
//!     → session.rs (channel admission)
//!     → tunnel::channel (one task per session channel)
//! ```

pub mod auth;
pub mod keys;
pub mod server;
pub mod session;

use thiserror::Error;

use crate::config::ValidationError;
use crate::net::ListenerError;
use crate::routing::RouteError;

pub use auth::{AuthorizedKey, Authenticator};
pub use server::{BoundServer, TunnelServer};
pub use session::{SessionHandler, SshChannel};

/// Errors surfaced by the SSH layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("ssh protocol error: {0}")]
    Russh(#[from] russh::Error),

    #[error("host key error: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to prepare routes: {0}")]
    Routes(#[from] RouteError),

    #[error("invalid server setting: {0}")]
    Setting(#[from] ValidationError),
}
