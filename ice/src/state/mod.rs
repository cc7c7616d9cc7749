
use std::fmt;

/// The candidate engine's substate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IceState {
    /// No gathering has started.
    Init,

    /// Local candidates are being collected.
    Gathering,

    /// The local set is complete; trickle updates may still arrive.
    GatheringDone,

    /// Connectivity checks are running against the remote set.
    Checking,

    /// A pair has been nominated and published as the active path.
    Nominated,
}

impl Default for IceState {
    fn default() -> Self {
        Self::Init
    }
}

impl fmt::Display for IceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Init => "init",
            Self::Gathering => "gathering",
            Self::GatheringDone => "gathering-done",
            Self::Checking => "checking",
            Self::Nominated => "nominated",
        };
        write!(f, "{s}")
    }
}

impl From<u8> for IceState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gathering,
            2 => Self::GatheringDone,
            3 => Self::Checking,
            4 => Self::Nominated,
            _ => Self::Init,
        }
    }
}

/// The NAT punch engine's substate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PunchState {
    Init,

    /// Speculative probing (LAN shortcut) before the punch proper.
    Probing,

    /// Punch datagrams are being retried against every remote target.
    Punching,

    /// Some address answered; the direct path is open.
    Connected,

    /// The deadline passed; traffic is routed through a relay.
    Relay,
}

impl Default for PunchState {
    fn default() -> Self {
        Self::Init
    }
}

impl fmt::Display for PunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Init => "init",
            Self::Probing => "probing",
            Self::Punching => "punching",
            Self::Connected => "connected",
            Self::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl From<u8> for PunchState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Probing,
            2 => Self::Punching,
            3 => Self::Connected,
            4 => Self::Relay,
            _ => Self::Init,
        }
    }
}
