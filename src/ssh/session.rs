//! Per-connection SSH session handling.
//!
//! One [`SessionHandler`] exists per TCP connection. russh drives it through
//! the handshake and authentication; afterwards it:
//!
//! - accepts `session` channels and spawns a channel handler task for each
//! - rejects every other channel type
//! - refuses out-of-band global requests so the transport never waits on them

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tracing::{debug, info, trace, Instrument};

use crate::http::request::TunnelPeer;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::ssh::auth::Authenticator;
use crate::ssh::Error;
use crate::tunnel::channel::{ChannelHandler, TunnelChannel};

/// The only channel type the bridge services.
pub const SESSION_CHANNEL_TYPE: &str = "session";

/// Reason logged for every other channel type.
pub const UNKNOWN_CHANNEL_TYPE: &str = "unknown channel type";

/// russh channel seen through the [`TunnelChannel`] interface.
pub struct SshChannel {
    inner: Channel<Msg>,
    inbox: Inbox,
}

impl SshChannel {
    pub fn new(inner: Channel<Msg>) -> Self {
        Self {
            inner,
            inbox: Inbox::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id()
    }
}

#[async_trait]
impl TunnelChannel for SshChannel {
    /// Waits for the first data packet, then also takes packets already
    /// queued behind it until `buf` is full.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.inbox.ready() {
            let msg = self.inner.wait().await;
            self.inbox.accept(msg);
        }

        let inner = &mut self.inner;
        self.inbox.fill(buf.len(), || inner.wait().now_or_never());
        Ok(self.inbox.take(buf))
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.data(data).await.map_err(io::Error::other)?;
        Ok(data.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        // The peer may already have closed its side.
        let _ = self.inner.eof().await;
        self.inner.close().await.map_err(io::Error::other)
    }
}

/// Data received from the peer but not yet handed to a reader.
#[derive(Debug, Default)]
struct Inbox {
    pending: Vec<u8>,
    finished: bool,
}

impl Inbox {
    fn accept(&mut self, msg: Option<ChannelMsg>) {
        match msg {
            Some(ChannelMsg::Data { data }) => self.pending.extend_from_slice(&data),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => self.finished = true,
            Some(other) => trace!(message = ?other, "Ignoring channel message"),
        }
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty() || self.finished
    }

    /// Accept messages from `poll` until `limit` bytes are pending, the
    /// stream ends, or `poll` has nothing queued.
    fn fill(&mut self, limit: usize, mut poll: impl FnMut() -> Option<Option<ChannelMsg>>) {
        while self.pending.len() < limit && !self.finished {
            match poll() {
                Some(msg) => self.accept(msg),
                None => break,
            }
        }
    }

    /// Move up to `buf.len()` pending bytes into `buf`. The rest stays queued.
    fn take(&mut self, buf: &mut [u8]) -> usize {
        let len = self.pending.len().min(buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.drain(..len);
        len
    }
}

/// russh handler for one SSH connection.
pub struct SessionHandler {
    connection_id: ConnectionId,
    remote_addr: SocketAddr,
    user: Option<String>,
    auth: Arc<Authenticator>,
    channels: ChannelHandler,
    established: Arc<AtomicBool>,
}

impl SessionHandler {
    pub fn new(
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        auth: Arc<Authenticator>,
        channels: ChannelHandler,
    ) -> Self {
        Self {
            connection_id,
            remote_addr,
            user: None,
            auth,
            channels,
            established: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once authentication succeeds. Lets the owner tell a failed
    /// handshake from a later connection error.
    pub fn established(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.established)
    }

    fn peer(&self) -> TunnelPeer {
        TunnelPeer {
            connection_id: self.connection_id,
            remote_addr: self.remote_addr,
            user: self.user.clone(),
        }
    }

    fn accept(&mut self, user: &str, method: &'static str) -> Auth {
        self.user = Some(user.to_string());
        self.established.store(true, Ordering::SeqCst);
        info!(
            connection_id = %self.connection_id,
            remote_addr = %self.remote_addr,
            user,
            method,
            "Connection established"
        );
        Auth::Accept
    }

    fn reject(&self, user: &str, method: &'static str) -> Auth {
        debug!(
            connection_id = %self.connection_id,
            user,
            method,
            "Authentication rejected"
        );
        Auth::Reject {
            proceed_with_methods: None,
        }
    }

    fn reject_channel(&self, channel_type: &'static str, channel: ChannelId) -> bool {
        debug!(
            connection_id = %self.connection_id,
            channel = ?channel,
            channel_type,
            reason = UNKNOWN_CHANNEL_TYPE,
            "Rejecting channel"
        );
        metrics::record_channel_rejected(channel_type);
        false
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.auth.check_none(user) {
            Ok(self.accept(user, "none"))
        } else {
            Ok(self.reject(user, "none"))
        }
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.auth.check_password(user, password) {
            Ok(self.accept(user, "password"))
        } else {
            Ok(self.reject(user, "password"))
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.auth.check_public_key(user, &public_key.public_key_base64()) {
            Ok(self.accept(user, "publickey"))
        } else {
            Ok(self.reject(user, "publickey"))
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let channel = SshChannel::new(channel);
        let span = tracing::info_span!(
            "channel",
            connection_id = %self.connection_id,
            channel = ?channel.id()
        );
        trace!(parent: &span, channel_type = SESSION_CHANNEL_TYPE, "Channel accepted");

        let handler = self.channels.clone();
        let peer = self.peer();
        tokio::spawn(
            async move {
                handler.serve(channel, Some(peer)).await;
            }
            .instrument(span),
        );
        Ok(true)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.reject_channel("x11", channel.id()))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.reject_channel("direct-tcpip", channel.id()))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.reject_channel("forwarded-tcpip", channel.id()))
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        trace!(
            connection_id = %self.connection_id,
            request = "tcpip-forward",
            address,
            port = *port,
            "Discarding global request"
        );
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        trace!(
            connection_id = %self.connection_id,
            request = "cancel-tcpip-forward",
            address,
            port,
            "Discarding global request"
        );
        Ok(false)
    }
}
