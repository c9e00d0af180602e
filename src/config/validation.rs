//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check that the credential set lets at least someone in
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BridgeConfig;
use crate::net::listener::split_host_port;
use crate::ssh::auth::AuthorizedKey;

/// Largest single read a channel may be configured for.
pub const MAX_PAYLOAD_CEILING: usize = 16 * 1024 * 1024;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not host:port")]
    BindAddress(String),
    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,
    #[error("tunnel.max_payload_bytes must be between 1 and {MAX_PAYLOAD_CEILING}, got {0}")]
    PayloadSize(usize),
    #[error("auth.users[{0}] has an empty name")]
    EmptyUserName(usize),
    #[error("auth user `{0}` is declared more than once")]
    DuplicateUser(String),
    #[error("auth user `{0}` has neither a password nor an authorized key")]
    NoCredentials(String),
    #[error("auth user `{user}` has an unparsable authorized key: `{line}`")]
    AuthorizedKey { user: String, line: String },
    #[error("no users configured and anonymous access disabled")]
    NobodyCanLogIn,
    #[error("observability.log_level `{0}` is not one of trace, debug, info, warn, error")]
    LogLevel(String),
    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if split_host_port(&config.listener.bind_address).is_none() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    let payload = config.tunnel.max_payload_bytes;
    if payload == 0 || payload > MAX_PAYLOAD_CEILING {
        errors.push(ValidationError::PayloadSize(payload));
    }

    let mut seen = HashSet::new();
    for (index, user) in config.auth.users.iter().enumerate() {
        if user.name.is_empty() {
            errors.push(ValidationError::EmptyUserName(index));
            continue;
        }
        if !seen.insert(user.name.as_str()) {
            errors.push(ValidationError::DuplicateUser(user.name.clone()));
        }
        if user.password.is_none() && user.authorized_keys.is_empty() {
            errors.push(ValidationError::NoCredentials(user.name.clone()));
        }
        for line in &user.authorized_keys {
            if AuthorizedKey::parse(line).is_none() {
                errors.push(ValidationError::AuthorizedKey {
                    user: user.name.clone(),
                    line: line.clone(),
                });
            }
        }
    }
    if config.auth.users.is_empty() && !config.auth.allow_anonymous {
        errors.push(ValidationError::NobodyCanLogIn);
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
