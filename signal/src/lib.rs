//! Signaling providers for natlink sessions.
//!
//! Three providers satisfy one upward contract — register an identity
//! pair, push candidate batches, surface remote candidates and peer
//! presence as polled events:
//!
//! - [`stateful`]: the sequenced rendezvous protocol (REGISTER /
//!   PEER_INFO / ALIVE / NAT_PROBE with per-message retry and ack
//!   dedupe), spoken as datagrams from the session's own UDP socket so
//!   the server's echo doubles as a server-reflexive probe.
//! - [`simple`]: a stateless UDP registry lookup. No trickling, no
//!   offline caching.
//! - [`pubsub`]: a shared mutable blob with `offer`/`answer` fields,
//!   polled on fixed intervals, candidate payloads sealed with an AEAD
//!   derived from the shared `auth_key`.
//!
//! The [`server`] module implements the rendezvous side: the pair
//! table, candidate caching for offline peers, heartbeat sweep,
//! PEER_OFF notification, datagram relaying and the NAT-probe echo
//! socket, reachable over UDP and over "RELY"-framed TCP streams.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod event;
pub mod notif;
pub mod pubsub;
pub mod server;
pub mod simple;
pub mod stateful;

pub use crate::error::{Error, Result};
pub use crate::event::{NatClass, SignalEvent, SignalState};
pub use crate::notif::{next_notif_seq, notif_fresh};
pub use crate::pubsub::{Blob, BlobStore, MemoryBlobStore, PubSubChannel, PubSubRole};
pub use crate::server::{RendezvousServer, ServerConfig};
pub use crate::simple::{SimpleClient, SimpleRegistry};
pub use crate::stateful::StatefulClient;

use std::time::Duration;

/// Retry period for REGISTER and PEER_INFO.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Bounded attempts before signaling is declared unreachable.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Heartbeat period once registered.
pub const ALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// A peer silent for this long is declared gone.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(60);
