
use std::fmt;
use std::net::Ipv4Addr;

use ice::gather::ReflexiveSource;
use signal::BlobStore;

use crate::error::{Error, Result};

/// Selects the signaling provider a session rendezvouses through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalingMode {
    /// Stateless UDP registry lookup.
    Simple,
    /// Sequenced rendezvous-server protocol with offline caching.
    Stateful,
    /// Shared-blob offer/answer channel.
    PubSub,
}

impl Default for SignalingMode {
    fn default() -> Self {
        Self::Stateful
    }
}

impl fmt::Display for SignalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Simple => "simple",
            Self::Stateful => "stateful",
            Self::PubSub => "pubsub",
        };
        write!(f, "{s}")
    }
}

pub type OnConnectedHdlrFn = Box<dyn FnMut() + Send>;
pub type OnDisconnectedHdlrFn = Box<dyn FnMut() + Send>;
pub type OnDataHdlrFn = Box<dyn FnMut(&[u8]) + Send>;

/// Everything a session needs at creation. Invalid combinations are
/// rejected by `create` before any socket is bound.
pub struct SessionConfig {
    /// Local UDP port; 0 lets the kernel choose.
    pub bind_port: u16,
    /// Local identity, 1..=32 bytes.
    pub peer_id: String,
    pub signaling_mode: SignalingMode,
    /// Rendezvous server / registry, for Simple and Stateful modes.
    pub server_host: String,
    pub server_port: u16,
    /// Handed to the external STUN collaborator; the engine itself
    /// only consumes the candidates it produces.
    pub stun_server: String,
    pub stun_port: u16,
    /// Handed to the external TURN collaborator.
    pub turn_server: String,
    pub turn_port: u16,
    pub turn_user: String,
    pub turn_pass: String,
    /// Shared secret sealing PUB/SUB payloads.
    pub auth_key: String,
    /// Also attempt a TCP simultaneous-open punch alongside UDP.
    pub enable_tcp: bool,
    /// Drive the session from an internal thread instead of manual
    /// `tick` calls.
    pub threaded: bool,
    /// Tick cadence of the internal thread, 1..=1000 ms.
    pub update_interval_ms: u16,
    /// Never take the LAN shortcut, even on the same subnet.
    pub disable_lan_shortcut: bool,
    /// Host addresses to advertise; empty = discover the default
    /// route.
    pub host_allow_list: Vec<Ipv4Addr>,
    /// Out-of-band srflx/relay candidate source (STUN/TURN client).
    pub reflexive_source: Option<Box<dyn ReflexiveSource + Send>>,
    /// Blob backend for PUB/SUB mode.
    pub blob_store: Option<Box<dyn BlobStore + Send>>,
    pub on_connected: Option<OnConnectedHdlrFn>,
    pub on_disconnected: Option<OnDisconnectedHdlrFn>,
    pub on_data: Option<OnDataHdlrFn>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            bind_port: 0,
            peer_id: String::new(),
            signaling_mode: SignalingMode::default(),
            server_host: String::new(),
            server_port: 0,
            stun_server: String::new(),
            stun_port: 3478,
            turn_server: String::new(),
            turn_port: 3478,
            turn_user: String::new(),
            turn_pass: String::new(),
            auth_key: String::new(),
            enable_tcp: false,
            threaded: false,
            update_interval_ms: 10,
            disable_lan_shortcut: false,
            host_allow_list: Vec::new(),
            reflexive_source: None,
            blob_store: None,
            on_connected: None,
            on_disconnected: None,
            on_data: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("bind_port", &self.bind_port)
            .field("peer_id", &self.peer_id)
            .field("signaling_mode", &self.signaling_mode)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("threaded", &self.threaded)
            .field("update_interval_ms", &self.update_interval_ms)
            .field("disable_lan_shortcut", &self.disable_lan_shortcut)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.peer_id.is_empty() || self.peer_id.len() > 32 {
            return Err(Error::ErrInvalidPeerId);
        }
        if self.update_interval_ms == 0 || self.update_interval_ms > 1000 {
            return Err(Error::ErrInvalidUpdateInterval);
        }
        match self.signaling_mode {
            SignalingMode::Simple | SignalingMode::Stateful => {
                if self.server_host.is_empty() || self.server_port == 0 {
                    return Err(Error::ErrMissingServer);
                }
            }
            SignalingMode::PubSub => {
                if self.auth_key.is_empty() {
                    return Err(Error::ErrMissingAuthKey);
                }
                if self.blob_store.is_none() {
                    return Err(Error::ErrMissingBlobStore);
                }
            }
        }
        Ok(())
    }
}
