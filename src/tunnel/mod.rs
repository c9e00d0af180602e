//! Tunnel protocol.
//!
//! # Data Flow
//! ```text
//! accepted "session" channel
//!     → channel.rs (single read, dispatch, close)
//!     → envelope.rs (routing key from the JSON payload)
//! ```
//!
//! # Design Decisions
//! - One request per channel; the channel is never reused
//! - The raw payload is forwarded as the request body untouched
//! - Envelope decode failures follow `tunnel.on_decode_error`

pub mod channel;
pub mod envelope;

pub use channel::{ChannelHandler, ChannelOutcome, TunnelChannel};
pub use envelope::{Envelope, EnvelopeError};
