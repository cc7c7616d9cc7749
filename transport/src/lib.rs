//! Reliable transport for the natlink data plane.
//!
//! natlink-transport contains a fully deterministic fixed-window ARQ
//! tailored for UDP under hole-punched NATs. It contains no networking
//! code and takes every timestamp as an argument: the session layer
//! feeds it decoded DATA/ACK packets, drains outbound packets via
//! `poll_transmit`, and drives retransmission from `tick`.
//!
//! Sequences are 16-bit and compared with wrap-aware signed difference;
//! acknowledgement is cumulative with a 32-bit selective-ack bitmap on
//! top; the retransmission timeout follows smoothed RTT with the
//! clamped range [50 ms, 2000 ms].

#![warn(rust_2018_idioms)]

mod error;
pub mod reliable;
pub mod rto;
mod stats;

pub use crate::error::{Error, Result};
pub use crate::reliable::{seq_diff, ReliableTransport, DEFAULT_MAX_RETRANS, DEFAULT_WINDOW};
pub use crate::rto::{RtoEstimator, RTO_INITIAL_MS, RTO_MAX_MS, RTO_MIN_MS};
pub use crate::stats::TransportStats;
