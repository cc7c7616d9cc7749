#[cfg(test)]
mod server_test;

pub(crate) mod table;

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use slab::Slab;

use proto::{
    encode_frame, Body, Packet, PacketType, PeerInfo, Register, RegisterAck, RegisterStatus,
    StreamDecoder, FLAG_FIN, FLAG_RELAY_AVAILABLE,
};

use crate::error::Result;
use crate::PEER_TIMEOUT;

pub use self::table::{PairEntry, PairTable, PeerLink, Route};

const RECEIVE_MTU: usize = 2048;

/// Tuning knobs for a rendezvous server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Candidates cached per entry while the peer is offline.
    pub max_cache: usize,
    /// Entries silent for this long are removed and their partner is
    /// sent PEER_OFF.
    pub peer_timeout: Duration,
    /// Bind a second UDP port that echoes observed endpoints for NAT
    /// classification.
    pub enable_probe: bool,
    /// Advertise and perform datagram relaying between paired clients.
    pub enable_relay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_cache: 8,
            peer_timeout: PEER_TIMEOUT,
            enable_probe: true,
            enable_relay: true,
        }
    }
}

struct StreamConn {
    stream: TcpStream,
    decoder: StreamDecoder,
    outbuf: Vec<u8>,
    peer_addr: Option<SocketAddrV4>,
}

/// The rendezvous server: pair table, candidate cache, PEER_INFO
/// forwarding, heartbeat sweep, datagram relay and the NAT-probe echo.
///
/// Clients speak the identical protocol over UDP datagrams or over
/// "RELY"-framed TCP streams on the same port. Everything runs inside
/// `tick`; all sockets are non-blocking.
pub struct RendezvousServer {
    udp: UdpSocket,
    probe: Option<UdpSocket>,
    tcp: TcpListener,
    conns: Slab<StreamConn>,
    table: PairTable,
    config: ServerConfig,
    dropped_malformed: u64,
}

impl RendezvousServer {
    pub fn bind(addr: SocketAddrV4, config: ServerConfig) -> Result<Self> {
        let udp = UdpSocket::bind(addr)?;
        udp.set_nonblocking(true)?;
        let local = match udp.local_addr()? {
            SocketAddr::V4(a) => a,
            SocketAddr::V6(_) => unreachable!("bound v4"),
        };

        let tcp = TcpListener::bind(local)?;
        tcp.set_nonblocking(true)?;

        let probe = if config.enable_probe {
            let p = UdpSocket::bind(SocketAddrV4::new(*local.ip(), 0))?;
            p.set_nonblocking(true)?;
            Some(p)
        } else {
            None
        };

        log::info!("rendezvous server on {local}");
        Ok(RendezvousServer {
            udp,
            probe,
            tcp,
            conns: Slab::new(),
            table: PairTable::new(config.max_cache),
            config,
            dropped_malformed: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4> {
        match self.udp.local_addr()? {
            SocketAddr::V4(a) => Ok(a),
            SocketAddr::V6(_) => unreachable!("bound v4"),
        }
    }

    pub fn probe_port(&self) -> u16 {
        self.probe
            .as_ref()
            .and_then(|p| p.local_addr().ok())
            .map(|a| a.port())
            .unwrap_or(0)
    }

    pub fn table(&self) -> &PairTable {
        &self.table
    }

    pub fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed
    }

    /// One cooperative step: drain every socket, forward, sweep.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        self.drain_udp(now)?;
        self.drain_probe()?;
        self.accept_streams()?;
        self.drain_streams(now);
        self.flush_streams();
        self.sweep(now);
        Ok(())
    }

    fn drain_udp(&mut self, now: Instant) -> Result<()> {
        let mut buf = [0u8; RECEIVE_MTU];
        loop {
            let (n, from) = match self.udp.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                // Windows surfaces ICMP port-unreachable as an error on
                // the next recv; treat it like an empty read.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };
            let from = match from {
                SocketAddr::V4(a) => a,
                SocketAddr::V6(_) => continue,
            };
            match Packet::decode(&buf[..n]) {
                Ok(pkt) => self.handle_packet(pkt, Route::Udp(from), from, now),
                Err(e) => {
                    self.dropped_malformed += 1;
                    log::trace!("malformed datagram from {from}: {e}");
                }
            }
        }
    }

    fn drain_probe(&mut self) -> Result<()> {
        let Some(probe) = &self.probe else {
            return Ok(());
        };
        let mut buf = [0u8; RECEIVE_MTU];
        loop {
            let (n, from) = match probe.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };
            let SocketAddr::V4(from) = from else { continue };
            let Ok(pkt) = Packet::decode(&buf[..n]) else {
                self.dropped_malformed += 1;
                continue;
            };
            if let Body::NatProbe { tsx_id } = pkt.body {
                let ack = Packet::new(Body::NatProbeAck {
                    mapped: from,
                    tsx_id,
                });
                let _ = probe.send_to(&ack.encode(), from);
            }
        }
    }

    fn accept_streams(&mut self) -> Result<()> {
        loop {
            match self.tcp.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    let peer_addr = match peer {
                        SocketAddr::V4(a) => Some(a),
                        SocketAddr::V6(_) => None,
                    };
                    let idx = self.conns.insert(StreamConn {
                        stream,
                        decoder: StreamDecoder::new(),
                        outbuf: Vec::new(),
                        peer_addr,
                    });
                    log::debug!("stream client #{idx} connected");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn drain_streams(&mut self, now: Instant) {
        let mut closed = Vec::new();
        let mut inbound = Vec::new();

        for (idx, conn) in self.conns.iter_mut() {
            let mut buf = [0u8; RECEIVE_MTU];
            loop {
                match conn.stream.read(&mut buf) {
                    Ok(0) => {
                        closed.push(idx);
                        break;
                    }
                    Ok(n) => conn.decoder.push(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        closed.push(idx);
                        break;
                    }
                }
            }
            loop {
                match conn.decoder.next_packet() {
                    Ok(Some(pkt)) => inbound.push((idx, pkt)),
                    Ok(None) => break,
                    Err(_) => {
                        // Desynchronized framing poisons the stream.
                        self.dropped_malformed += 1;
                        closed.push(idx);
                        break;
                    }
                }
            }
        }

        for (idx, pkt) in inbound {
            let observed = self.conns.get(idx).and_then(|c| c.peer_addr);
            let observed = match observed {
                Some(a) => a,
                None => continue,
            };
            self.handle_packet(pkt, Route::Stream(idx), observed, now);
        }

        closed.sort_unstable();
        closed.dedup();
        for idx in closed {
            self.disconnect_stream(idx);
        }
    }

    fn disconnect_stream(&mut self, idx: usize) {
        if !self.conns.contains(idx) {
            return;
        }
        self.conns.remove(idx);
        log::debug!("stream client #{idx} disconnected");
        if let Some(entry_idx) = self.table.find_by_stream(idx) {
            if let Some((partner, dead_sid)) = self.table.remove(entry_idx) {
                self.notify_peer_off(partner, dead_sid);
            }
        }
    }

    fn flush_streams(&mut self) {
        let mut closed = Vec::new();
        for (idx, conn) in self.conns.iter_mut() {
            while !conn.outbuf.is_empty() {
                match conn.stream.write(&conn.outbuf) {
                    Ok(0) => {
                        closed.push(idx);
                        break;
                    }
                    Ok(n) => {
                        conn.outbuf.drain(..n);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        closed.push(idx);
                        break;
                    }
                }
            }
        }
        for idx in closed {
            self.disconnect_stream(idx);
        }
    }

    fn handle_packet(&mut self, pkt: Packet, route: Route, observed: SocketAddrV4, now: Instant) {
        match pkt.packet_type() {
            PacketType::Register => {
                if let Body::Register(reg) = &pkt.body {
                    let reg = reg.clone();
                    self.handle_register(&reg, route, observed, now);
                }
            }
            PacketType::Alive => {
                let Body::Alive { session_id } = pkt.body else {
                    return;
                };
                if let Some(idx) = self.table.find_by_session(session_id) {
                    self.table.touch(idx, now);
                    // The data-plane mapping can move between NAT
                    // rebinds; keep it current.
                    if let (Route::Udp(from), Some(entry)) = (route, self.table.get_mut(idx)) {
                        entry.udp_endpoint = Some(from);
                    }
                }
                self.send_route(route, &Packet::new(Body::AliveAck { session_id }));
            }
            PacketType::PeerInfo => self.forward_peer_info(pkt, now),
            PacketType::PeerInfoAck => self.forward_peer_info_ack(pkt, now),
            PacketType::RelayData => self.relay(pkt),
            PacketType::NatProbe => {
                let Body::NatProbe { tsx_id } = pkt.body else {
                    return;
                };
                // Probes on the primary socket still get an echo; the
                // classification just sees identical mappings.
                self.send_route(
                    route,
                    &Packet::new(Body::NatProbeAck {
                        mapped: observed,
                        tsx_id,
                    }),
                );
            }
            _ => {}
        }
    }

    fn handle_register(
        &mut self,
        reg: &Register,
        route: Route,
        observed: SocketAddrV4,
        now: Instant,
    ) {
        if reg.local_id.is_empty() {
            let ack = RegisterAck {
                status: RegisterStatus::ErrorBadPeerId,
                max_candidates: 0,
                session_id: 0,
                mapped: observed,
                probe_port: self.probe_port(),
            };
            self.send_route(route, &Packet::new(Body::RegisterAck(ack)));
            return;
        }

        let udp_endpoint = match route {
            Route::Udp(a) => Some(a),
            Route::Stream(_) => None,
        };
        let outcome = self.table.register(reg, route, udp_endpoint, now);
        let session_id = self
            .table
            .get(outcome.idx)
            .map(|e| e.session_id)
            .unwrap_or(0);

        let ack = RegisterAck {
            status: if outcome.peer_online {
                RegisterStatus::PeerOnline
            } else {
                RegisterStatus::PeerOffline
            },
            max_candidates: self.table.max_cache() as u8,
            session_id,
            mapped: observed,
            probe_port: self.probe_port(),
        };
        let mut pkt = Packet::new(Body::RegisterAck(ack));
        if self.config.enable_relay {
            pkt.flags |= FLAG_RELAY_AVAILABLE;
        }
        self.send_route(route, &pkt);

        // A fresh link delivers both caches: each side gets
        // PEER_INFO(seq=1) with what its partner left behind.
        if let Some(partner) = outcome.linked {
            self.send_initial_info(outcome.idx, partner);
            self.send_initial_info(partner, outcome.idx);
        }
    }

    /// Sends the cached candidates of `from_idx` to `to_idx` as the
    /// server-initial PEER_INFO (seq=1, base=0, FIN).
    fn send_initial_info(&mut self, to_idx: usize, from_idx: usize) {
        let Some((route, pkt)) = (|| {
            let to = self.table.get(to_idx)?;
            let from = self.table.get(from_idx)?;
            let timestamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let mut pkt = Packet::with_seq(
                Body::PeerInfo(PeerInfo {
                    sender_id: from.local_id.clone(),
                    target_id: to.local_id.clone(),
                    timestamp_ms,
                    flags: FLAG_FIN,
                    base_index: 0,
                    candidates: from.cache.clone(),
                }),
                1,
            );
            pkt.flags |= FLAG_FIN;
            Some((to.route, pkt))
        })() else {
            return;
        };
        self.send_route(route, &pkt);
    }

    fn forward_peer_info(&mut self, pkt: Packet, now: Instant) {
        let Body::PeerInfo(info) = &pkt.body else {
            return;
        };
        let Some(sender_idx) = self
            .table
            .find_pair(&info.sender_id, &info.target_id)
            .or_else(|| self.table.find_by_local(&info.sender_id))
        else {
            return;
        };
        self.table.touch(sender_idx, now);

        match self.table.peer_of(sender_idx) {
            Some(peer_idx) => {
                let route = match self.table.get(peer_idx) {
                    Some(e) => e.route,
                    None => return,
                };
                self.send_route(route, &pkt);
            }
            None => {
                // Partner offline: cache what fits and ack in its
                // stead so the sender's retries settle.
                self.table.cache_candidates(sender_idx, &info.candidates);
                let ack = Packet::with_seq(
                    Body::PeerInfoAck {
                        sender_id: info.target_id.clone(),
                        target_id: info.sender_id.clone(),
                    },
                    pkt.seq,
                );
                let route = match self.table.get(sender_idx) {
                    Some(e) => e.route,
                    None => return,
                };
                self.send_route(route, &ack);
            }
        }
    }

    fn forward_peer_info_ack(&mut self, pkt: Packet, now: Instant) {
        let Body::PeerInfoAck { sender_id, target_id } = &pkt.body else {
            return;
        };
        let Some(sender_idx) = self
            .table
            .find_pair(sender_id, target_id)
            .or_else(|| self.table.find_by_local(sender_id))
        else {
            return;
        };
        self.table.touch(sender_idx, now);
        let Some(peer_idx) = self.table.peer_of(sender_idx) else {
            return;
        };
        let route = match self.table.get(peer_idx) {
            Some(e) => e.route,
            None => return,
        };
        self.send_route(route, &pkt);
    }

    fn relay(&mut self, pkt: Packet) {
        if !self.config.enable_relay {
            return;
        }
        let Body::RelayData { session_id, .. } = &pkt.body else {
            return;
        };
        let Some(sender_idx) = self.table.find_by_session(*session_id) else {
            return;
        };
        let Some(peer_idx) = self.table.peer_of(sender_idx) else {
            return;
        };
        let Some(endpoint) = self.table.get(peer_idx).and_then(|e| e.udp_endpoint) else {
            return;
        };
        let _ = self.udp.send_to(&pkt.encode(), endpoint);
    }

    fn sweep(&mut self, now: Instant) {
        let timeout = self.config.peer_timeout;
        let notifications = self.table.sweep(now, timeout);
        for (partner_idx, dead_sid) in notifications {
            self.notify_peer_off(partner_idx, dead_sid);
        }
    }

    fn notify_peer_off(&mut self, partner_idx: usize, dead_session_id: u64) {
        let Some(route) = self.table.get(partner_idx).map(|e| e.route) else {
            return;
        };
        let pkt = Packet::new(Body::PeerOff {
            session_id: dead_session_id,
        });
        self.send_route(route, &pkt);
    }

    fn send_route(&mut self, route: Route, pkt: &Packet) {
        match route {
            Route::Udp(addr) => {
                let _ = self.udp.send_to(&pkt.encode(), addr);
            }
            Route::Stream(idx) => {
                if let Some(conn) = self.conns.get_mut(idx) {
                    conn.outbuf.extend_from_slice(&encode_frame(pkt));
                }
            }
        }
    }
}
