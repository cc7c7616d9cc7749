
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;
use fxhash::FxHashMap;

use proto::{PeerId, SimpleFrame, SimpleType};

use crate::error::Result;
use crate::event::{SignalEvent, SignalState};
use crate::{MAX_RETRY_ATTEMPTS, PEER_TIMEOUT, RETRY_INTERVAL};

/// Client for the stateless UDP registry.
///
/// HELLO announces this peer under its id (the registry records the
/// observed source endpoint); PEER_INFO_REQ polls for the target's
/// endpoint. No trickling, no offline caching, no sequencing — lost
/// datagrams are healed by the fixed retry cadence. Like the stateful
/// provider it performs no I/O of its own: frames leave through
/// `poll_transmit` on the session's socket.
pub struct SimpleClient {
    server: SocketAddrV4,
    local_id: PeerId,
    remote_id: PeerId,
    state: SignalState,
    hello_last: Option<Instant>,
    query_last: Option<Instant>,
    query_attempts: u32,
    resolved: bool,
    events: VecDeque<SignalEvent>,
    transmits: VecDeque<(SocketAddrV4, Bytes)>,
}

impl SimpleClient {
    pub fn new(server: SocketAddrV4, local_id: PeerId) -> Self {
        SimpleClient {
            server,
            local_id,
            remote_id: PeerId::empty(),
            state: SignalState::Idle,
            hello_last: None,
            query_last: None,
            query_attempts: 0,
            resolved: false,
            events: VecDeque::new(),
            transmits: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Announces under `local_id` and, with a non-empty remote, starts
    /// polling for the target endpoint.
    pub fn register(&mut self, remote_id: PeerId, local_hint: SocketAddrV4, now: Instant) {
        self.remote_id = remote_id;
        self.state = SignalState::Registered;
        let hello =
            SimpleFrame::with_addr(SimpleType::Hello, self.local_id.clone(), &local_hint);
        self.transmits.push_back((self.server, hello.encode()));
        self.hello_last = Some(now);
        self.events.push_back(SignalEvent::Registered {
            session_id: 0,
            mapped: None,
            relay_available: false,
            max_candidates: 0,
            peer_online: false,
        });
        if !self.remote_id.is_empty() {
            self.send_query(now);
        }
    }

    fn send_query(&mut self, now: Instant) {
        let req = SimpleFrame::new(SimpleType::PeerInfoReq, self.remote_id.clone());
        self.transmits.push_back((self.server, req.encode()));
        self.query_last = Some(now);
        self.query_attempts += 1;
    }

    /// Feeds one datagram that arrived from the registry address.
    pub fn handle_datagram(&mut self, raw: &[u8], from: SocketAddrV4, _now: Instant) {
        if from != self.server {
            return;
        }
        let Ok(frame) = SimpleFrame::decode(raw) else {
            return;
        };
        if frame.typ != SimpleType::PeerInfo || self.resolved {
            return;
        }
        match frame.addr() {
            Ok(Some(addr)) => {
                log::debug!("registry resolved {} -> {addr}", frame.peer_id);
                self.resolved = true;
                self.state = SignalState::Ready;
                self.events.push_back(SignalEvent::PeerOnline);
                self.events.push_back(SignalEvent::PeerEndpoint(addr));
            }
            Ok(None) => {
                // Target not registered yet; keep polling.
            }
            Err(_) => {}
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.state != SignalState::Registered && self.state != SignalState::Ready {
            return;
        }

        let hello_due = self
            .hello_last
            .map_or(false, |t| now.saturating_duration_since(t) >= RETRY_INTERVAL);
        if hello_due {
            // Periodic HELLO keeps the registry entry and the NAT
            // mapping fresh; reuse the observed mapping as the hint.
            let hello = SimpleFrame::new(SimpleType::Hello, self.local_id.clone());
            self.transmits.push_back((self.server, hello.encode()));
            self.hello_last = Some(now);
        }

        if !self.resolved && !self.remote_id.is_empty() {
            let due = self
                .query_last
                .map_or(true, |t| now.saturating_duration_since(t) >= RETRY_INTERVAL);
            if due {
                if self.query_attempts >= MAX_RETRY_ATTEMPTS {
                    self.state = SignalState::Closed;
                    self.events.push_back(SignalEvent::Fatal {
                        reason: "registry lookup exhausted".into(),
                    });
                    return;
                }
                self.send_query(now);
            }
        }
    }

    pub fn poll_event(&mut self) -> Option<SignalEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<(SocketAddrV4, Bytes)> {
        self.transmits.pop_front()
    }

    pub fn close(&mut self) {
        self.state = SignalState::Closed;
    }
}

/// The registry itself: peer id to last observed endpoint, nothing
/// more. Entries expire with the peer timeout.
pub struct SimpleRegistry {
    socket: UdpSocket,
    entries: FxHashMap<String, (SocketAddrV4, Instant)>,
    timeout: Duration,
}

impl SimpleRegistry {
    pub fn bind(addr: SocketAddrV4) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(SimpleRegistry {
            socket,
            entries: FxHashMap::default(),
            timeout: PEER_TIMEOUT,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4> {
        match self.socket.local_addr()? {
            SocketAddr::V4(a) => Ok(a),
            SocketAddr::V6(_) => unreachable!("bound v4"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };
            let SocketAddr::V4(from) = from else { continue };
            let Ok(frame) = SimpleFrame::decode(&buf[..n]) else {
                continue;
            };
            match frame.typ {
                SimpleType::Hello => {
                    // The observed source wins over the self-reported
                    // hint: it is what the peer's NAT actually maps.
                    self.entries
                        .insert(frame.peer_id.as_str().to_owned(), (from, now));
                }
                SimpleType::PeerInfoReq => {
                    let reply = match self.entries.get(frame.peer_id.as_str()) {
                        Some((addr, _)) => {
                            SimpleFrame::with_addr(SimpleType::PeerInfo, frame.peer_id, addr)
                        }
                        None => SimpleFrame::new(SimpleType::PeerInfo, frame.peer_id),
                    };
                    let _ = self.socket.send_to(&reply.encode(), from);
                }
                SimpleType::PeerInfo => {}
            }
        }

        let timeout = self.timeout;
        self.entries
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < timeout);
        Ok(())
    }
}
