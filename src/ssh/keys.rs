//! Host key loading and russh server configuration.

use std::sync::Arc;
use std::time::Duration;

use russh::server::Config;
use russh::SshId;
use russh_keys::key::KeyPair;

use crate::config::SshConfig;
use crate::ssh::auth::Authenticator;
use crate::ssh::Error;

/// Load the configured host key, or generate an ephemeral Ed25519 key.
pub fn load_host_key(config: &SshConfig) -> Result<KeyPair, Error> {
    match &config.host_key_path {
        Some(path) => {
            let key = russh_keys::load_secret_key(path, None)?;
            tracing::info!(path = %path, algorithm = key.name(), "Loaded host key");
            Ok(key)
        }
        None => {
            tracing::info!("Generating ephemeral Ed25519 host key");
            Ok(KeyPair::generate_ed25519())
        }
    }
}

/// Build the handshake configuration consumed by every session.
pub fn server_config(config: &SshConfig, auth: &Authenticator) -> Result<Arc<Config>, Error> {
    let mut russh_config = Config::default();

    russh_config.server_id = SshId::Standard(config.server_id.clone());
    russh_config.inactivity_timeout =
        (config.inactivity_timeout_secs > 0).then(|| Duration::from_secs(config.inactivity_timeout_secs));
    russh_config.auth_rejection_time = Duration::from_millis(config.auth_rejection_delay_ms);
    russh_config.max_auth_attempts = config.max_auth_attempts;
    russh_config.methods = auth.methods();
    russh_config.keys.push(load_host_key(config)?);

    Ok(Arc::new(russh_config))
}
