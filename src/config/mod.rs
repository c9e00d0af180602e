//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → consumed once at startup to build the SSH config and route table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use schema::AuthConfig;
pub use schema::BridgeConfig;
pub use schema::DecodeFailurePolicy;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::SshConfig;
pub use schema::TunnelConfig;
pub use schema::UserConfig;
pub use validation::{validate_config, ValidationError};
