//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Default single-read ceiling for one tunneled request.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1_000_000;

/// Root configuration for the SSH → HTTP bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// SSH transport settings handed to the handshake.
    pub ssh: SshConfig,

    /// Accepted credentials.
    pub auth: AuthConfig,

    /// Per-channel tunnel behaviour.
    pub tunnel: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2222").
    pub bind_address: String,

    /// Maximum concurrent SSH connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            max_connections: 10_000,
        }
    }
}

/// SSH transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    /// Identification string sent during version exchange.
    pub server_id: String,

    /// Path to an OpenSSH private host key. An ephemeral Ed25519 key is
    /// generated when unset.
    pub host_key_path: Option<String>,

    /// Idle connection timeout in seconds (0 disables it).
    pub inactivity_timeout_secs: u64,

    /// Delay before answering a failed authentication attempt.
    pub auth_rejection_delay_ms: u64,

    /// Authentication attempts allowed per connection.
    pub max_auth_attempts: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            server_id: format!("SSH-2.0-ssh-http-bridge_{}", env!("CARGO_PKG_VERSION")),
            host_key_path: None,
            inactivity_timeout_secs: 0,
            auth_rejection_delay_ms: 1000,
            max_auth_attempts: 10,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept the `none` method for any user name.
    pub allow_anonymous: bool,

    /// Known users.
    pub users: Vec<UserConfig>,
}

/// A single user allowed to open tunnels.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// SSH user name.
    pub name: String,

    /// Password for the `password` method.
    #[serde(default)]
    pub password: Option<String>,

    /// Public keys in `authorized_keys` line format.
    #[serde(default)]
    pub authorized_keys: Vec<String>,
}

/// What the channel handler does when the envelope cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Log and continue with an empty routing key; the lookup then fails as
    /// a missing route. Matches what existing tunnel clients expect.
    #[default]
    Continue,
    /// Log and stop processing the channel.
    Abort,
}

/// Tunnel behaviour applied to every accepted channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Size of the single read performed on each channel.
    pub max_payload_bytes: usize,

    /// Envelope decode failure handling.
    pub on_decode_error: DecodeFailurePolicy,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            on_decode_error: DecodeFailurePolicy::Continue,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
