#[cfg(test)]
mod stateful_test;

use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use proto::{
    Body, CandidateRecord, Packet, PeerId, PeerInfo, Register, RegisterStatus, FLAG_FIN,
    FLAG_RELAY_AVAILABLE,
};

use crate::error::{Error, Result};
use crate::event::{NatClass, SignalEvent, SignalState};
use crate::notif::{next_notif_seq, notif_fresh};
use crate::{ALIVE_INTERVAL, MAX_RETRY_ATTEMPTS, RETRY_INTERVAL};

/// Candidate slices use sequences 2..=17; together with the server
/// delivery (1) and the notification slot (0) that is the whole ack
/// window.
pub const MAX_SLICE_SEQ: u16 = 17;

const CANDIDATES_PER_SLICE: usize = 8;
const NAT_PROBE_ATTEMPTS: u32 = 3;

#[derive(Debug)]
struct PendingSlice {
    seq: u16,
    base_index: u8,
    records: Vec<CandidateRecord>,
    fin: bool,
    last_send: Option<Instant>,
    attempts: u32,
}

#[derive(Debug)]
struct PendingNotif {
    seq: u8,
    record: CandidateRecord,
    last_send: Option<Instant>,
    attempts: u32,
}

/// Client side of the sequenced rendezvous protocol.
///
/// Performs no I/O: the session feeds decoded packets through
/// `handle_packet` and flushes `poll_transmit` onto its UDP socket.
/// Sending REGISTER from the data socket is what makes the server's
/// observed endpoint a usable server-reflexive candidate.
pub struct StatefulClient {
    server: SocketAddrV4,
    local_id: PeerId,
    remote_id: PeerId,
    /// Partner identity learned from PEER_INFO, which may differ from
    /// `remote_id` when we registered passively.
    peer_id: PeerId,
    tie_breaker: u64,

    state: SignalState,
    session_id: u64,
    mapped: Option<SocketAddrV4>,
    relay_available: bool,
    max_candidates: u8,
    probe_port: u16,
    nat_class: NatClass,
    nat_probe: Option<(u32, Instant, u32)>,

    register_candidates: Vec<CandidateRecord>,
    register_last: Option<Instant>,
    register_attempts: u32,

    next_slice_seq: u16,
    next_base_index: u8,
    pending: Vec<PendingSlice>,
    pending_notif: Option<PendingNotif>,
    notif_seq_out: u8,
    notif_seq_in: u8,
    recv_mask: u32,

    alive_last: Option<Instant>,
    protocol_errors: u64,

    events: VecDeque<SignalEvent>,
    transmits: VecDeque<(SocketAddrV4, Packet)>,
}

impl StatefulClient {
    pub fn new(server: SocketAddrV4, local_id: PeerId) -> Self {
        StatefulClient {
            server,
            local_id,
            remote_id: PeerId::empty(),
            peer_id: PeerId::empty(),
            tie_breaker: rand::random(),
            state: SignalState::Idle,
            session_id: 0,
            mapped: None,
            relay_available: false,
            max_candidates: 0,
            probe_port: 0,
            nat_class: NatClass::Unknown,
            nat_probe: None,
            register_candidates: Vec::new(),
            register_last: None,
            register_attempts: 0,
            next_slice_seq: 2,
            next_base_index: 0,
            pending: Vec::new(),
            pending_notif: None,
            notif_seq_out: 0,
            notif_seq_in: 0,
            recv_mask: 0,
            alive_last: None,
            protocol_errors: 0,
            events: VecDeque::new(),
            transmits: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn mapped(&self) -> Option<SocketAddrV4> {
        self.mapped
    }

    pub fn relay_available(&self) -> bool {
        self.relay_available
    }

    pub fn nat_class(&self) -> NatClass {
        self.nat_class
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    /// The partner identity, once known.
    pub fn peer_id(&self) -> &PeerId {
        if self.peer_id.is_empty() {
            &self.remote_id
        } else {
            &self.peer_id
        }
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Starts registering `(local_id, remote_id)`; an empty remote id
    /// registers passively, waiting for any offerer.
    pub fn register(
        &mut self,
        remote_id: PeerId,
        candidates: Vec<CandidateRecord>,
        now: Instant,
    ) {
        self.remote_id = remote_id;
        self.register_candidates = candidates;
        self.state = SignalState::Registering;
        self.register_attempts = 0;
        self.send_register(now);
    }

    fn send_register(&mut self, now: Instant) {
        let reg = Register {
            local_id: self.local_id.clone(),
            remote_id: self.remote_id.clone(),
            tie_breaker: self.tie_breaker,
            candidates: self.register_candidates.clone(),
        };
        log::debug!(
            "REGISTER {} -> {} (attempt {})",
            self.local_id,
            self.remote_id,
            self.register_attempts + 1
        );
        self.transmits
            .push_back((self.server, Packet::new(Body::Register(reg))));
        self.register_last = Some(now);
        self.register_attempts += 1;
    }

    /// Sends a candidate batch as PEER_INFO slices (seq >= 2), each
    /// retried until its ack arrives. The last slice carries FIN.
    pub fn send_candidates(&mut self, batch: &[CandidateRecord], now: Instant) -> Result<()> {
        if !matches!(self.state, SignalState::Registered | SignalState::Ready) {
            return Err(Error::ErrNotRegistered);
        }
        if batch.is_empty() {
            return Ok(());
        }
        let chunks: Vec<&[CandidateRecord]> = batch.chunks(CANDIDATES_PER_SLICE).collect();
        if self.next_slice_seq + chunks.len() as u16 - 1 > MAX_SLICE_SEQ {
            return Err(Error::ErrBatchTooLarge);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let slice = PendingSlice {
                seq: self.next_slice_seq,
                base_index: self.next_base_index,
                records: chunk.to_vec(),
                fin: i == chunks.len() - 1,
                last_send: None,
                attempts: 0,
            };
            self.next_slice_seq += 1;
            self.next_base_index = self.next_base_index.wrapping_add(chunk.len() as u8);
            self.send_slice_at(slice, now);
        }
        Ok(())
    }

    fn send_slice_at(&mut self, mut slice: PendingSlice, now: Instant) {
        let mut pkt = self.peer_info_packet(
            slice.seq,
            slice.base_index,
            slice.records.clone(),
        );
        if slice.fin {
            pkt.flags |= FLAG_FIN;
        }
        self.transmits.push_back((self.server, pkt));
        slice.last_send = Some(now);
        slice.attempts += 1;
        self.pending.push(slice);
    }

    /// Announces a changed candidate with the next notification
    /// sequence; a newer notification replaces an unacked older one.
    pub fn notify_address_change(
        &mut self,
        record: CandidateRecord,
        now: Instant,
    ) -> Result<()> {
        if !matches!(self.state, SignalState::Registered | SignalState::Ready) {
            return Err(Error::ErrNotRegistered);
        }
        self.notif_seq_out = next_notif_seq(self.notif_seq_out);
        let notif = PendingNotif {
            seq: self.notif_seq_out,
            record,
            last_send: None,
            attempts: 0,
        };
        self.send_notif(notif, now);
        Ok(())
    }

    fn send_notif(&mut self, mut notif: PendingNotif, now: Instant) {
        let pkt = self.peer_info_packet(0, notif.seq, vec![notif.record]);
        // FIN must never ride on a notification.
        debug_assert!(pkt.flags & FLAG_FIN == 0);
        self.transmits.push_back((self.server, pkt));
        notif.last_send = Some(now);
        notif.attempts += 1;
        self.pending_notif = Some(notif);
    }

    fn peer_info_packet(
        &self,
        seq: u16,
        base_index: u8,
        candidates: Vec<CandidateRecord>,
    ) -> Packet {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Packet::with_seq(
            Body::PeerInfo(PeerInfo {
                sender_id: self.local_id.clone(),
                target_id: self.peer_id().clone(),
                timestamp_ms,
                flags: 0,
                base_index,
                candidates,
            }),
            seq,
        )
    }

    /// Feeds one decoded signaling packet.
    pub fn handle_packet(&mut self, pkt: &Packet, from: SocketAddrV4, now: Instant) {
        match &pkt.body {
            Body::RegisterAck(ack) if from == self.server => {
                if self.state != SignalState::Registering {
                    return;
                }
                self.session_id = ack.session_id;
                self.mapped = Some(ack.mapped);
                self.max_candidates = ack.max_candidates;
                self.probe_port = ack.probe_port;
                self.relay_available = pkt.has_flag(FLAG_RELAY_AVAILABLE);
                let peer_online = ack.status == RegisterStatus::PeerOnline;
                self.state = if peer_online {
                    SignalState::Ready
                } else {
                    SignalState::Registered
                };
                log::info!(
                    "registered: session {} mapped {} peer {}",
                    self.session_id,
                    ack.mapped,
                    if peer_online { "online" } else { "offline" }
                );
                self.events.push_back(SignalEvent::Registered {
                    session_id: ack.session_id,
                    mapped: Some(ack.mapped),
                    relay_available: self.relay_available,
                    max_candidates: ack.max_candidates,
                    peer_online,
                });
                if self.probe_port != 0 {
                    self.send_nat_probe(now);
                }
            }
            Body::PeerInfo(info) => self.handle_peer_info(pkt, info, from, now),
            Body::PeerInfoAck { .. } => self.handle_peer_info_ack(pkt.seq),
            Body::AliveAck { .. } => {}
            Body::PeerOff { session_id } if from == self.server => {
                log::info!("peer session {session_id} disappeared");
                self.peer_id = PeerId::empty();
                self.recv_mask = 0;
                self.pending.clear();
                self.pending_notif = None;
                self.next_slice_seq = 2;
                self.next_base_index = 0;
                if self.state == SignalState::Ready {
                    self.state = SignalState::Registered;
                }
                self.events.push_back(SignalEvent::PeerOffline);
            }
            Body::NatProbeAck { mapped, tsx_id } => {
                if let Some((tsx, _, _)) = self.nat_probe {
                    if tsx == *tsx_id {
                        self.nat_class = if Some(*mapped) == self.mapped {
                            NatClass::Cone
                        } else {
                            NatClass::Symmetric
                        };
                        log::debug!("nat classified as {}", self.nat_class);
                        self.nat_probe = None;
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_peer_info(
        &mut self,
        pkt: &Packet,
        info: &PeerInfo,
        from: SocketAddrV4,
        _now: Instant,
    ) {
        // Learn the partner identity; a passive registration fills its
        // remote id from the first inbound PEER_INFO.
        if !info.sender_id.is_empty() && info.sender_id != self.local_id {
            self.peer_id = info.sender_id.clone();
            if self.remote_id.is_empty() {
                self.remote_id = info.sender_id.clone();
            }
        }

        let seq = pkt.seq;
        if seq == 0 {
            // Address-change notification: exactly one candidate,
            // base_index is the cyclic counter, FIN forbidden.
            if info.base_index == 0 || info.candidates.len() != 1 || pkt.has_flag(FLAG_FIN) {
                self.protocol_errors += 1;
                return;
            }
            self.ack_peer_info(0, from);
            if notif_fresh(info.base_index, self.notif_seq_in) {
                self.notif_seq_in = info.base_index;
                self.events.push_back(SignalEvent::AddressChange {
                    candidate: info.candidates[0],
                    notif_seq: info.base_index,
                });
            }
            // Stale notifications are acked but ignored.
            return;
        }

        if seq > MAX_SLICE_SEQ {
            self.protocol_errors += 1;
            return;
        }

        self.ack_peer_info(seq, from);
        let bit = 1u32 << seq;
        if self.recv_mask & bit != 0 {
            // Duplicate: the ack above heals a lost ack, nothing more.
            return;
        }
        self.recv_mask |= bit;

        if seq == 1 && self.state == SignalState::Registered {
            self.state = SignalState::Ready;
            self.events.push_back(SignalEvent::PeerOnline);
        }
        self.events.push_back(SignalEvent::RemoteCandidates {
            candidates: info.candidates.clone(),
            base_index: info.base_index,
            fin: pkt.has_flag(FLAG_FIN),
            reset: false,
        });
    }

    fn handle_peer_info_ack(&mut self, seq: u16) {
        if seq == 0 {
            self.pending_notif = None;
        } else if seq <= MAX_SLICE_SEQ {
            self.pending.retain(|p| p.seq != seq);
        } else {
            self.protocol_errors += 1;
        }
    }

    fn ack_peer_info(&mut self, seq: u16, to: SocketAddrV4) {
        let pkt = Packet::with_seq(
            Body::PeerInfoAck {
                sender_id: self.local_id.clone(),
                target_id: self.peer_id().clone(),
            },
            seq,
        );
        self.transmits.push_back((to, pkt));
    }

    fn send_nat_probe(&mut self, now: Instant) {
        let tsx = match self.nat_probe {
            Some((tsx, _, attempts)) => {
                self.nat_probe = Some((tsx, now, attempts + 1));
                tsx
            }
            None => {
                let tsx: u32 = rand::random();
                self.nat_probe = Some((tsx, now, 1));
                tsx
            }
        };
        let probe_addr = SocketAddrV4::new(*self.server.ip(), self.probe_port);
        self.transmits
            .push_back((probe_addr, Packet::new(Body::NatProbe { tsx_id: tsx })));
    }

    /// Drives every retry schedule. Call at the session tick cadence.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            SignalState::Registering => {
                let due = self
                    .register_last
                    .map_or(true, |t| now.saturating_duration_since(t) >= RETRY_INTERVAL);
                if !due {
                    return;
                }
                if self.register_attempts >= MAX_RETRY_ATTEMPTS {
                    log::warn!("REGISTER retries exhausted");
                    self.state = SignalState::Closed;
                    self.events.push_back(SignalEvent::Fatal {
                        reason: "signaling unreachable".into(),
                    });
                    return;
                }
                self.send_register(now);
            }
            SignalState::Registered | SignalState::Ready => {
                let alive_due = self
                    .alive_last
                    .map_or(true, |t| now.saturating_duration_since(t) >= ALIVE_INTERVAL);
                if alive_due {
                    let pkt = Packet::new(Body::Alive {
                        session_id: self.session_id,
                    });
                    self.transmits.push_back((self.server, pkt));
                    self.alive_last = Some(now);
                }

                self.retry_pending(now);

                if let Some((_, last, attempts)) = self.nat_probe {
                    if attempts < NAT_PROBE_ATTEMPTS
                        && now.saturating_duration_since(last) >= RETRY_INTERVAL
                    {
                        self.send_nat_probe(now);
                    }
                }
            }
            _ => {}
        }
    }

    fn retry_pending(&mut self, now: Instant) {
        let mut fatal = false;

        let mut resend = Vec::new();
        for slice in &mut self.pending {
            let due = slice
                .last_send
                .map_or(true, |t| now.saturating_duration_since(t) >= RETRY_INTERVAL);
            if !due {
                continue;
            }
            if slice.attempts >= MAX_RETRY_ATTEMPTS {
                fatal = true;
                break;
            }
            slice.attempts += 1;
            slice.last_send = Some(now);
            resend.push((slice.seq, slice.base_index, slice.records.clone(), slice.fin));
        }
        for (seq, base_index, records, fin) in resend {
            let mut pkt = self.peer_info_packet(seq, base_index, records);
            if fin {
                pkt.flags |= FLAG_FIN;
            }
            self.transmits.push_back((self.server, pkt));
        }

        if let Some(mut notif) = self.pending_notif.take() {
            let due = notif
                .last_send
                .map_or(true, |t| now.saturating_duration_since(t) >= RETRY_INTERVAL);
            if !due {
                self.pending_notif = Some(notif);
            } else if notif.attempts >= MAX_RETRY_ATTEMPTS {
                // A lost notification is not fatal: the candidate also
                // travels in later slices.
            } else {
                notif.attempts += 1;
                notif.last_send = Some(now);
                let pkt = self.peer_info_packet(0, notif.seq, vec![notif.record]);
                self.transmits.push_back((self.server, pkt));
                self.pending_notif = Some(notif);
            }
        }

        if fatal {
            log::warn!("PEER_INFO retries exhausted");
            self.state = SignalState::Closed;
            self.events.push_back(SignalEvent::Fatal {
                reason: "signaling unreachable".into(),
            });
        }
    }

    pub fn poll_event(&mut self) -> Option<SignalEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<(SocketAddrV4, Packet)> {
        self.transmits.pop_front()
    }

    /// Idempotent; the sequenced protocol has no stream to flush.
    pub fn close(&mut self) {
        self.state = SignalState::Closed;
    }
}
