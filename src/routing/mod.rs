//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     RouteProvider::prepare_routes(&mut RouteTableBuilder)
//!     → validate keys (non-empty, unique)
//!     → freeze as immutable RouteTable, shared via Arc
//!
//! Per channel:
//!     routing key
//!     → table.rs (exact lookup)
//!     → handler.rs (RouteHandler::serve into a ResponseSink)
//! ```

pub mod handler;
pub mod table;

pub use handler::{write_all, HandlerError, RouteHandler, ServiceHandler};
pub use table::{prepare_routes, RouteError, RouteProvider, RouteTable, RouteTableBuilder};
