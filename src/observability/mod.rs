//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every lifecycle transition (accept, handshake, transfer, dispatch) is a
//!   log event with connection and channel ids as fields
//! - Metrics are cheap (atomic increments) and off unless an exporter runs

pub mod logging;
pub mod metrics;
