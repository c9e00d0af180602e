//! HTTP side of the bridge.
//!
//! # Data Flow
//! ```text
//! channel payload + routing key
//!     → request.rs (synthetic POST, request ID, peer extensions)
//!     → [route handler]
//!     → relay.rs (body writes → SSH channel; status/headers dropped)
//! ```

pub mod builtin;
pub mod relay;
pub mod request;

pub use builtin::BuiltinRoutes;
pub use relay::{CapturedResponse, ResponseRelay, ResponseSink};
pub use request::{build_request, request_target, RequestId, RoutingKey, TunnelPeer, X_REQUEST_ID};
