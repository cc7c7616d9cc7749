//! natlink: a peer-to-peer session engine.
//!
//! A [`Session`] establishes a reliable bidirectional byte-stream to one
//! remote peer across NATs: candidates are gathered and exchanged
//! through a pluggable signaling plane, a hole is punched with a
//! punch/punch-ack exchange (falling back to a server relay when the
//! NATs refuse), and application bytes then flow over a sliding-window
//! reliable transport on UDP.
//!
//! Sessions are cooperative: everything advances inside [`Session`]
//! calls, driven either by a caller invoking `tick()` at a ~10 ms
//! cadence or by the internal thread enabled with
//! [`SessionConfig::threaded`].
//!
//! ```no_run
//! use natlink::{Session, SessionConfig, SignalingMode};
//!
//! # fn main() -> natlink::Result<()> {
//! let mut config = SessionConfig::default();
//! config.peer_id = "alice".to_owned();
//! config.signaling_mode = SignalingMode::Stateful;
//! config.server_host = "rendezvous.example".to_owned();
//! config.server_port = 8888;
//! config.threaded = true;
//!
//! let session = Session::create(config)?;
//! session.connect(Some("bob"))?;
//! while !session.is_ready() {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! session.send(b"hello")?;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod session;

pub use crate::config::{SessionConfig, SignalingMode};
pub use crate::error::{Error, Result};
pub use crate::session::{PathKind, Session, SessionState};

pub use ice;
pub use proto;
pub use signal;
pub use transport;
