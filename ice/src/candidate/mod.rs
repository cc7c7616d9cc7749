
use std::fmt;
use std::net::SocketAddrV4;

use crc::{Crc, CRC_32_ISCSI};
use serde::Serialize;

use proto::{CandidateKind, CandidateRecord};

use crate::{COMPONENT, DEFAULT_LOCAL_PREFERENCE};

/// A runtime candidate: one endpoint the engine may try to reach the
/// peer through, or be reached at.
///
/// Distinct from the wire [`CandidateRecord`] so that serialization can
/// never trample runtime state such as punch timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    /// Externally reachable endpoint.
    pub addr: SocketAddrV4,
    /// Local endpoint this candidate was derived from. Same as `addr`
    /// for host candidates, the outgoing socket for srflx/relay.
    pub base_addr: SocketAddrV4,
    pub priority: u32,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} prio {}", self.kind, self.addr, self.priority)
    }
}

impl Candidate {
    /// Builds a candidate with the standard priority for its kind.
    pub fn new(kind: CandidateKind, addr: SocketAddrV4, base_addr: SocketAddrV4) -> Self {
        Self::with_local_preference(kind, addr, base_addr, DEFAULT_LOCAL_PREFERENCE)
    }

    /// Builds a candidate with an explicit local preference, used to
    /// keep priorities unique when several candidates share a kind.
    pub fn with_local_preference(
        kind: CandidateKind,
        addr: SocketAddrV4,
        base_addr: SocketAddrV4,
        local_preference: u16,
    ) -> Self {
        Candidate {
            kind,
            addr,
            base_addr,
            priority: priority_of(kind, local_preference),
        }
    }

    /// An arbitrary string grouping similar candidates: same kind and
    /// same base address yield the same foundation.
    pub fn foundation(&self) -> String {
        let mut buf = vec![];
        buf.extend_from_slice(self.kind.to_string().as_bytes());
        buf.extend_from_slice(self.base_addr.to_string().as_bytes());

        let checksum = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&buf);
        format!("{checksum}")
    }

    pub fn to_record(&self) -> CandidateRecord {
        CandidateRecord {
            kind: self.kind,
            addr: self.addr,
            base_addr: self.base_addr,
            priority: self.priority,
        }
    }

    pub fn from_record(rec: &CandidateRecord) -> Self {
        Candidate {
            kind: rec.kind,
            addr: rec.addr,
            base_addr: rec.base_addr,
            priority: rec.priority,
        }
    }
}

/// Computes the 32-bit candidate priority:
/// `(type_pref << 24) | (local_pref << 8) | (256 - component)`.
pub fn priority_of(kind: CandidateKind, local_preference: u16) -> u32 {
    (1 << 24) * u32::from(kind.preference())
        + (1 << 8) * u32::from(local_preference)
        + (256 - u32::from(COMPONENT))
}

/// Represents the connectivity-check state of a candidate pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// No check may run yet; the pair waits for its foundation group.
    #[serde(rename = "frozen")]
    Frozen,

    /// The pair is eligible; a check has not been sent.
    #[serde(rename = "waiting")]
    Waiting,

    /// A check is outstanding.
    #[serde(rename = "in-progress")]
    InProgress,

    /// A check round-tripped.
    #[serde(rename = "succeeded")]
    Succeeded,

    /// The pair gave up.
    #[serde(rename = "failed")]
    Failed,
}

impl Default for CandidatePairState {
    fn default() -> Self {
        Self::Frozen
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Represents a combination of a local and a remote candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    pub local: Candidate,
    pub remote: Candidate,
    pub state: CandidatePairState,
    pub nominated: bool,
    controlling: bool,
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority,
            self.local,
            self.remote,
            self.remote.priority
        )
    }
}

impl CandidatePair {
    pub fn new(local: Candidate, remote: Candidate, controlling: bool) -> Self {
        CandidatePair {
            local,
            remote,
            state: CandidatePairState::Frozen,
            nominated: false,
            controlling,
        }
    }

    /// RFC 8445 6.1.2.3. Let G be the controlling side's candidate
    /// priority and D the controlled side's:
    /// `pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)`.
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.controlling {
            (self.local.priority, self.remote.priority)
        } else {
            (self.remote.priority, self.local.priority)
        };

        (1u64 << 32) * u64::from(std::cmp::min(g, d))
            + 2 * u64::from(std::cmp::max(g, d))
            + u64::from(g > d)
    }

    /// Ordering key for nomination ties: highest pair priority first,
    /// then lexicographic on the kinds.
    pub fn sort_key(&self) -> (u64, u8, u8) {
        (
            u64::MAX - self.priority(),
            self.local.kind as u8,
            self.remote.kind as u8,
        )
    }
}
