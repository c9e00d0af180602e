//! SSH to HTTP protocol bridge library.
//!
//! Terminates SSH, turns the payload of each `session` channel into one
//! synthetic HTTP request, dispatches it through a route table and writes the
//! response body back over the same channel.

pub mod client;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod ssh;
pub mod tunnel;

pub use config::schema::BridgeConfig;
pub use lifecycle::Shutdown;
pub use routing::{RouteProvider, RouteTable, RouteTableBuilder};
pub use ssh::TunnelServer;
