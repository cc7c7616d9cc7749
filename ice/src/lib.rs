//! Candidate gathering, connectivity checks and NAT hole punching.
//!
//! natlink-ice keeps the local and remote candidate sets, orders the
//! cross-product of candidate pairs by priority, and drives the
//! punch/punch-ack exchange that opens a path through both NATs. Like
//! the rest of the engine it performs no socket I/O: the session layer
//! feeds it decoded packets and drains outbound datagrams from
//! `poll_transmit`.

#![warn(rust_2018_idioms)]

pub mod candidate;
pub mod engine;
pub mod error;
pub mod gather;
pub mod punch;
pub mod state;

pub use crate::candidate::{Candidate, CandidatePair, CandidatePairState};
pub use crate::engine::CandidateEngine;
pub use crate::error::{Error, Result};
pub use crate::punch::tcp::TcpPunch;
pub use crate::punch::{PunchEngine, PUNCH_DEADLINE, PUNCH_INTERVAL_INITIAL_MS, PUNCH_INTERVAL_MAX_MS};
pub use crate::state::{IceState, PunchState};

pub use proto::CandidateKind;

/// The single data-stream component id.
pub const COMPONENT: u16 = 1;

/// Local preference assigned to the first candidate of a kind.
pub const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;
