//! Tunnel client.
//!
//! Opens one SSH session channel per request, sends the envelope payload,
//! half-closes and collects body bytes until the server closes the channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::ToSocketAddrs;

use crate::tunnel::envelope::Envelope;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("ssh protocol error: {0}")]
    Russh(#[from] russh::Error),

    #[error("key error: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("server rejected {method} authentication for {user:?}")]
    AuthRejected { user: String, method: &'static str },

    #[error("host key fingerprint {actual} does not match pinned {expected}")]
    HostKeyMismatch { expected: String, actual: String },
}

impl ClientError {
    /// Reason code sent by the server when it refused a channel open.
    pub fn channel_open_failure(&self) -> Option<russh::ChannelOpenFailure> {
        match self {
            Self::Russh(russh::Error::ChannelOpenFailure(reason)) => Some(*reason),
            _ => None,
        }
    }
}

/// How the client proves its identity.
#[derive(Clone)]
pub enum Credentials {
    None,
    Password(String),
    PublicKey(Arc<KeyPair>),
}

impl Credentials {
    /// Load a private key file, optionally encrypted.
    pub fn key_file(path: impl AsRef<std::path::Path>, passphrase: Option<&str>) -> Result<Self, ClientError> {
        let key = russh_keys::load_secret_key(path, passphrase)?;
        Ok(Self::PublicKey(Arc::new(key)))
    }

    fn method(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Password(_) => "password",
            Self::PublicKey(_) => "publickey",
        }
    }
}

/// Accepts any host key unless a fingerprint is pinned.
struct HostKeyCheck {
    pinned: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = ClientError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);
        match &self.pinned {
            Some(expected) if normalize_fingerprint(expected) != actual => {
                tracing::warn!(expected = %expected, actual = %actual, "Host key mismatch");
                Err(ClientError::HostKeyMismatch {
                    expected: expected.clone(),
                    actual,
                })
            }
            _ => {
                tracing::debug!(fingerprint = %actual, "Server host key");
                Ok(true)
            }
        }
    }
}

/// `SHA256:<base64>` form of a host key fingerprint, as OpenSSH prints it.
pub fn fingerprint(key: &PublicKey) -> String {
    format!("SHA256:{}", key.fingerprint())
}

fn normalize_fingerprint(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with("SHA256:") {
        trimmed.to_string()
    } else {
        format!("SHA256:{trimmed}")
    }
}

/// Builder-style options for [`TunnelClient::connect`].
#[derive(Clone)]
pub struct ClientOptions {
    pub user: String,
    pub credentials: Credentials,
    /// Expected host key fingerprint; any key is accepted when unset.
    pub host_fingerprint: Option<String>,
    pub inactivity_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn new(user: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            user: user.into(),
            credentials,
            host_fingerprint: None,
            inactivity_timeout: None,
        }
    }

    pub fn pin_host_key(mut self, fingerprint: impl Into<String>) -> Self {
        self.host_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }
}

/// An authenticated SSH connection to a bridge.
pub struct TunnelClient {
    handle: Handle<HostKeyCheck>,
}

impl TunnelClient {
    /// Connect and authenticate.
    pub async fn connect(addr: impl ToSocketAddrs, options: ClientOptions) -> Result<Self, ClientError> {
        let config = client::Config {
            inactivity_timeout: options.inactivity_timeout,
            ..client::Config::default()
        };
        let check = HostKeyCheck {
            pinned: options.host_fingerprint.clone(),
        };
        let mut handle = client::connect(Arc::new(config), addr, check).await?;

        let user = options.user.as_str();
        let accepted = match &options.credentials {
            Credentials::None => handle.authenticate_none(user).await?,
            Credentials::Password(password) => handle.authenticate_password(user, password).await?,
            Credentials::PublicKey(key) => handle.authenticate_publickey(user, Arc::clone(key)).await?,
        };
        if !accepted {
            return Err(ClientError::AuthRejected {
                user: options.user.clone(),
                method: options.credentials.method(),
            });
        }

        tracing::debug!(user, method = options.credentials.method(), "Authenticated");
        Ok(Self { handle })
    }

    /// Send `payload` verbatim on a fresh channel and return the body bytes.
    pub async fn send_raw(&self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.data(payload).await?;
        channel.eof().await?;
        Ok(collect_body(&mut channel).await)
    }

    /// Send a request for `route` with extra envelope fields.
    pub async fn request(&self, route: &str, fields: Map<String, Value>) -> Result<Vec<u8>, ClientError> {
        let payload = Envelope::new(route).encode_with(fields);
        self.send_raw(&payload).await
    }

    /// Ask the server for a non-session channel. Bridges refuse these.
    pub async fn open_direct_tcpip(&self, host: &str, port: u32) -> Result<(), ClientError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port, "127.0.0.1", 0)
            .await?;
        let _ = channel.close().await;
        Ok(())
    }

    /// Ask for a `direct-streamlocal@openssh.com` channel to `socket_path`.
    pub async fn open_direct_streamlocal(&self, socket_path: &str) -> Result<(), ClientError> {
        let channel = self.handle.channel_open_direct_streamlocal(socket_path).await?;
        let _ = channel.close().await;
        Ok(())
    }

    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

async fn collect_body(channel: &mut Channel<Msg>) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => body.extend_from_slice(&data),
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }
    body
}
