use std::fmt;
use std::net::SocketAddrV4;

use proto::CandidateRecord;

/// What the NAT-probe comparison learned about the local NAT.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NatClass {
    /// No probe ran or no answer yet.
    Unknown,
    /// Primary and probe ports observed the same mapping: cone-like,
    /// punchable.
    Cone,
    /// The mapping changed with the destination port: symmetric,
    /// punching is unlikely to work without a relay.
    Symmetric,
}

impl Default for NatClass {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for NatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Unknown => "unknown",
            Self::Cone => "cone",
            Self::Symmetric => "symmetric",
        };
        write!(f, "{s}")
    }
}

/// Client-side state of a signaling provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalState {
    Idle,
    Registering,
    /// Registered; the peer may still be offline.
    Registered,
    /// Registered and paired.
    Ready,
    Closing,
    Closed,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Idle => "idle",
            Self::Registering => "registering",
            Self::Registered => "registered",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Everything a provider reports upward, drained via `poll_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// The rendezvous server acknowledged our registration.
    Registered {
        session_id: u64,
        /// The endpoint the server observed us from; a free
        /// server-reflexive candidate when present.
        mapped: Option<SocketAddrV4>,
        relay_available: bool,
        max_candidates: u8,
        peer_online: bool,
    },

    /// The partner came online (both directions now linked).
    PeerOnline,

    /// The partner is gone; transient, registration stays valid.
    PeerOffline,

    /// A batch of remote candidates starting at `base_index`.
    RemoteCandidates {
        candidates: Vec<CandidateRecord>,
        base_index: u8,
        /// Last slice of the batch.
        fin: bool,
        /// Replace, do not merge, any previously learned remote set
        /// (PUB/SUB reset-on-first-offer).
        reset: bool,
    },

    /// An accepted address-change notification.
    AddressChange {
        candidate: CandidateRecord,
        notif_seq: u8,
    },

    /// A bare peer endpoint from the stateless registry.
    PeerEndpoint(SocketAddrV4),

    /// The provider gave up; the session turns this into a fatal
    /// error.
    Fatal { reason: String },
}
