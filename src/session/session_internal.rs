use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use ice::gather::{self, ReflexiveSource};
use ice::{Candidate, CandidateEngine, CandidateKind, PunchEngine, PunchState, TcpPunch};
use proto::{Body, CandidateRecord, Packet, PeerId, FLAG_RESPONSE};
use signal::{
    BlobStore, PubSubChannel, PubSubRole, SignalEvent, SimpleClient, StatefulClient,
};
use transport::ReliableTransport;

use crate::config::{
    OnConnectedHdlrFn, OnDataHdlrFn, OnDisconnectedHdlrFn, SessionConfig, SignalingMode,
};
use crate::error::{Error, Result};
use crate::session::{PathKind, SessionState};

const RECEIVE_MTU: usize = 2048;
/// How long `close` may spend flushing the retransmit queue.
const CLOSE_DEADLINE: Duration = Duration::from_secs(3);
const FIN_RETRY: Duration = Duration::from_millis(200);

/// The three signaling providers behind one operation set.
enum Provider {
    Stateful(StatefulClient),
    Simple(SimpleClient),
    PubSub(PubSubChannel),
}

/// Why a session died; reproduced as the error every later call gets.
#[derive(Debug, Copy, Clone)]
enum FatalKind {
    ConnectionLost,
    PunchFailed,
    SignalingUnreachable,
}

impl FatalKind {
    fn to_error(self) -> Error {
        match self {
            FatalKind::ConnectionLost => Error::ErrConnectionLost,
            FatalKind::PunchFailed => Error::ErrPunchFailed,
            FatalKind::SignalingUnreachable => Error::ErrSignalingUnreachable,
        }
    }
}

pub(crate) struct SessionInner {
    peer_id: PeerId,
    mode: SignalingMode,
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    server_addr: Option<SocketAddrV4>,
    state: SessionState,

    engine: CandidateEngine,
    punch: PunchEngine,
    /// Simultaneous-open companion to the UDP punch, present when
    /// `enable_tcp` is set.
    tcp_punch: Option<TcpPunch>,
    enable_tcp: bool,
    transport: ReliableTransport,
    provider: Option<Provider>,
    reflexive: Option<Box<dyn ReflexiveSource + Send>>,

    host_allow_list: Vec<Ipv4Addr>,
    auth_key: String,
    blob_store: Option<Box<dyn BlobStore + Send>>,

    session_id: u64,
    /// Session id of the peer's incarnation, learned from relayed
    /// traffic; a mismatch later means a stale incarnation.
    peer_session_id: u64,
    paired: bool,
    candidates_sent: usize,

    recv_buf: VecDeque<u8>,
    remote_fin: bool,
    fin_last: Option<Instant>,
    close_started: Option<Instant>,
    dropped_malformed: u64,

    on_connected: Option<OnConnectedHdlrFn>,
    on_disconnected: Option<OnDisconnectedHdlrFn>,
    on_data: Option<OnDataHdlrFn>,
    disconnect_notified: bool,
    fatal_kind: Option<FatalKind>,
}

impl SessionInner {
    pub(crate) fn new(mut config: SessionConfig) -> Result<Self> {
        let server_addr = match config.signaling_mode {
            SignalingMode::Simple | SignalingMode::Stateful => {
                Some(resolve_v4(&config.server_host, config.server_port)?)
            }
            SignalingMode::PubSub => None,
        };

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.bind_port))?;
        socket.set_nonblocking(true)?;
        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(a) => a,
            SocketAddr::V6(_) => unreachable!("bound v4"),
        };

        Ok(SessionInner {
            peer_id: PeerId::new(config.peer_id.as_str())?,
            mode: config.signaling_mode,
            socket,
            local_addr,
            server_addr,
            state: SessionState::Idle,
            engine: CandidateEngine::new(false),
            punch: PunchEngine::new(!config.disable_lan_shortcut),
            tcp_punch: None,
            enable_tcp: config.enable_tcp,
            transport: ReliableTransport::new(),
            provider: None,
            reflexive: config.reflexive_source.take(),
            host_allow_list: std::mem::take(&mut config.host_allow_list),
            auth_key: std::mem::take(&mut config.auth_key),
            blob_store: config.blob_store.take(),
            session_id: 0,
            peer_session_id: 0,
            paired: false,
            candidates_sent: 0,
            recv_buf: VecDeque::new(),
            remote_fin: false,
            fin_last: None,
            close_started: None,
            dropped_malformed: 0,
            on_connected: config.on_connected.take(),
            on_disconnected: config.on_disconnected.take(),
            on_data: config.on_data.take(),
            disconnect_notified: false,
            fatal_kind: None,
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.session_id
    }

    pub(crate) fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Connected | SessionState::Relay)
    }

    pub(crate) fn path(&self) -> PathKind {
        match self.state {
            SessionState::Relay => PathKind::Relay,
            SessionState::Connected => {
                if self.punch.is_lan_path() {
                    PathKind::Lan
                } else {
                    PathKind::Punch
                }
            }
            _ => PathKind::None,
        }
    }

    /// Peer endpoint of the TCP simultaneous-open, when `enable_tcp`
    /// was set and a connection crossed.
    pub(crate) fn tcp_path(&self) -> Option<SocketAddrV4> {
        self.tcp_punch.as_ref().and_then(|t| t.peer_addr())
    }

    pub(crate) fn srtt_ms(&self) -> Option<u64> {
        self.transport.srtt()
    }

    pub(crate) fn transport_stats(&self) -> transport::TransportStats {
        self.transport.stats().clone()
    }

    /// Starts registration; `None` registers passively, waiting for
    /// any offerer.
    pub(crate) fn connect(&mut self, remote: Option<&str>, now: Instant) -> Result<()> {
        if self.state != SessionState::Idle {
            return Ok(());
        }
        let remote_id = match remote {
            Some(id) => PeerId::new(id)?,
            None => PeerId::empty(),
        };
        // The offering side controls; ties between two offerers are
        // settled by the registration tie-breaker on the server.
        self.engine.set_controlling(!remote_id.is_empty());

        self.engine.begin_gathering();
        let host_ips = gather::host_ips(&self.host_allow_list);
        for ip in &host_ips {
            let addr = SocketAddrV4::new(*ip, self.local_addr.port());
            self.engine.add_local(CandidateKind::Host, addr, addr);
        }
        self.engine.gathering_done();
        self.punch.set_local_ips(host_ips);

        if self.enable_tcp {
            // The simultaneous-open listener shares the advertised
            // port, so one candidate address covers both protocols.
            match TcpPunch::bind(self.local_addr.port()) {
                Ok(tcp) => self.tcp_punch = Some(tcp),
                Err(e) => log::warn!("tcp punch unavailable: {e}"),
            }
        }

        let records = self.local_records();
        self.candidates_sent = records.len();

        match self.mode {
            SignalingMode::Stateful => {
                let server = self.server_addr.ok_or(Error::ErrMissingServer)?;
                let mut client = StatefulClient::new(server, self.peer_id.clone());
                client.register(remote_id, records, now);
                self.provider = Some(Provider::Stateful(client));
            }
            SignalingMode::Simple => {
                let server = self.server_addr.ok_or(Error::ErrMissingServer)?;
                let mut client = SimpleClient::new(server, self.peer_id.clone());
                client.register(remote_id, self.local_addr, now);
                self.provider = Some(Provider::Simple(client));
            }
            SignalingMode::PubSub => {
                let store = self.blob_store.take().ok_or(Error::ErrMissingBlobStore)?;
                let role = if remote_id.is_empty() {
                    PubSubRole::Subscriber
                } else {
                    PubSubRole::Publisher
                };
                let mut channel = PubSubChannel::new(store, role, &self.auth_key);
                channel.register(records, now)?;
                self.provider = Some(Provider::PubSub(channel));
            }
        }

        log::info!("{}: registering (remote {:?})", self.peer_id, remote);
        self.state = SessionState::Registering;
        self.flush_transmits();
        Ok(())
    }

    fn local_records(&self) -> Vec<CandidateRecord> {
        self.engine
            .local_candidates()
            .iter()
            .map(Candidate::to_record)
            .collect()
    }

    /// One cooperative step; never blocks.
    pub(crate) fn tick(&mut self, now: Instant) {
        if matches!(self.state, SessionState::Idle | SessionState::Closed | SessionState::Error) {
            return;
        }

        self.drain_socket(now);
        self.pump_provider_events(now);
        self.drive_punch(now);
        self.drive_tcp_punch(now);
        self.drive_transport(now);
        self.provider_tick(now);
        self.trickle_local(now);
        self.deliver_recv();
        self.drive_close(now);
        self.flush_transmits();
    }

    fn drain_socket(&mut self, now: Instant) {
        let mut buf = [0u8; RECEIVE_MTU];
        loop {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    log::warn!("socket receive failed: {e}");
                    return;
                }
            };
            let from = match from {
                SocketAddr::V4(a) => a,
                SocketAddr::V6(_) => continue,
            };

            // SIMPLE frames share the socket; anything from the
            // registry address belongs to that protocol.
            if self.mode == SignalingMode::Simple && Some(from) == self.server_addr {
                if let Some(Provider::Simple(client)) = &mut self.provider {
                    client.handle_datagram(&buf[..n], from, now);
                }
                continue;
            }

            match Packet::decode(&buf[..n]) {
                Ok(pkt) => self.dispatch(pkt, from, now),
                Err(e) => {
                    self.dropped_malformed += 1;
                    log::trace!("malformed datagram from {from}: {e}");
                }
            }
        }
    }

    fn dispatch(&mut self, pkt: Packet, from: SocketAddrV4, now: Instant) {
        if pkt.packet_type().is_signaling() {
            if let Some(Provider::Stateful(client)) = &mut self.provider {
                client.handle_packet(&pkt, from, now);
            }
            return;
        }

        match pkt.body {
            Body::Data(payload) => {
                self.transport.on_data(pkt.seq, payload);
            }
            Body::Ack { ack_seq, sack_bits } => self.transport.on_ack(ack_seq, sack_bits, now),
            Body::Punch => {
                self.punch.on_punch(from, now);
                self.after_punch_event();
            }
            Body::PunchAck => {
                self.punch.on_punch_ack(from, now);
                self.after_punch_event();
            }
            Body::RouteProbe => {
                if pkt.flags & FLAG_RESPONSE != 0 {
                    self.punch.on_route_probe_response(from, now);
                    self.after_punch_event();
                } else {
                    self.punch.on_route_probe(from);
                }
            }
            Body::Fin => self.on_remote_fin(now),
            Body::RelayData { session_id, inner } => {
                self.on_relay_data(session_id, &inner, now)
            }
            _ => {}
        }
    }

    fn on_relay_data(&mut self, sender_sid: u64, inner: &[u8], now: Instant) {
        if self.peer_session_id == 0 {
            self.peer_session_id = sender_sid;
        } else if self.peer_session_id != sender_sid {
            // A previous incarnation of the peer; drop.
            return;
        }
        let pkt = match Packet::decode(inner) {
            Ok(pkt) => pkt,
            Err(_) => {
                self.dropped_malformed += 1;
                return;
            }
        };
        // Only the data plane rides the relay.
        match pkt.body {
            Body::Data(payload) => {
                self.transport.on_data(pkt.seq, payload);
            }
            Body::Ack { ack_seq, sack_bits } => self.transport.on_ack(ack_seq, sack_bits, now),
            Body::Fin => self.on_remote_fin(now),
            _ => {}
        }
    }

    fn pump_provider_events(&mut self, now: Instant) {
        loop {
            let event = match &mut self.provider {
                Some(Provider::Stateful(c)) => c.poll_event(),
                Some(Provider::Simple(c)) => c.poll_event(),
                Some(Provider::PubSub(c)) => c.poll_event(),
                None => None,
            };
            let Some(event) = event else { return };

            match event {
                SignalEvent::Registered {
                    session_id,
                    mapped,
                    relay_available,
                    max_candidates: _,
                    peer_online,
                } => {
                    self.session_id = session_id;
                    self.punch.set_relay_available(relay_available);
                    if let Some(mapped) = mapped {
                        // The server's observation is a free
                        // server-reflexive candidate.
                        self.engine.add_local(
                            CandidateKind::ServerReflexive,
                            mapped,
                            self.local_addr,
                        );
                    }
                    if peer_online {
                        self.paired = true;
                    }
                }
                SignalEvent::PeerOnline => self.paired = true,
                SignalEvent::PeerOffline => self.on_peer_lost(),
                SignalEvent::RemoteCandidates {
                    candidates,
                    reset,
                    ..
                } => {
                    if reset {
                        self.engine.replace_remote(
                            candidates.iter().map(Candidate::from_record).collect(),
                        );
                    } else {
                        for rec in &candidates {
                            self.engine.add_remote(Candidate::from_record(rec));
                        }
                    }
                    self.paired = true;
                    self.absorb_new_targets(now);
                }
                SignalEvent::AddressChange { candidate, .. } => {
                    let cand = Candidate::from_record(&candidate);
                    log::debug!("peer address change to {}", cand.addr);
                    if self.punch.state() == PunchState::Connected {
                        self.punch.force_active(cand.addr);
                    }
                    self.engine.add_remote(cand);
                    self.absorb_new_targets(now);
                }
                SignalEvent::PeerEndpoint(addr) => {
                    self.engine.add_remote(Candidate::new(
                        CandidateKind::ServerReflexive,
                        addr,
                        addr,
                    ));
                    self.paired = true;
                    self.absorb_new_targets(now);
                }
                SignalEvent::Fatal { reason } => {
                    log::warn!("{}: signaling gave up: {reason}", self.peer_id);
                    self.fatal(FatalKind::SignalingUnreachable);
                }
            }
        }
    }

    /// Feeds any newly learned remote addresses to the punch engine:
    /// starts punching when everything is in place, trickles otherwise.
    fn absorb_new_targets(&mut self, now: Instant) {
        match self.state {
            SessionState::Registering => {
                if !self.paired || self.engine.remote_candidates().is_empty() {
                    return;
                }
                self.engine.begin_checking();
                let order = self.engine.check_order();
                if self.punch.begin(&order, now).is_err() {
                    return;
                }
                for addr in &order {
                    self.engine.mark_in_progress(*addr);
                }
                if let Some(tcp) = &mut self.tcp_punch {
                    for addr in &order {
                        tcp.add_target(*addr, now);
                    }
                }
                log::info!("{}: punching", self.peer_id);
                self.state = SessionState::Punching;
            }
            SessionState::Punching => {
                for addr in self.engine.check_order() {
                    self.punch.add_target(addr, now);
                    self.engine.mark_in_progress(addr);
                    if let Some(tcp) = &mut self.tcp_punch {
                        tcp.add_target(addr, now);
                    }
                }
            }
            _ => {}
        }
    }

    fn after_punch_event(&mut self) {
        // Registering is included: a peer that learned our candidates
        // first may punch us before our own checks start.
        if !matches!(
            self.state,
            SessionState::Registering | SessionState::Punching | SessionState::Relay
        ) {
            return;
        }
        match self.punch.state() {
            PunchState::Connected => {
                let Some(addr) = self.punch.active_addr() else {
                    return;
                };
                self.engine.on_success(addr);
                if self.state != SessionState::Connected {
                    log::info!("{}: connected via {addr}", self.peer_id);
                    self.state = SessionState::Connected;
                    self.disconnect_notified = false;
                    if let Some(cb) = &mut self.on_connected {
                        cb();
                    }
                }
            }
            PunchState::Relay => {
                if self.state == SessionState::Punching {
                    log::info!("{}: relaying through the server", self.peer_id);
                    self.state = SessionState::Relay;
                    self.disconnect_notified = false;
                    if let Some(cb) = &mut self.on_connected {
                        cb();
                    }
                }
            }
            _ => {}
        }
    }

    fn drive_punch(&mut self, now: Instant) {
        if self.state != SessionState::Punching {
            return;
        }
        match self.punch.tick(now) {
            Ok(()) => self.after_punch_event(),
            Err(_) => {
                self.engine.mark_failed();
                self.fatal(FatalKind::PunchFailed);
            }
        }
    }

    fn drive_tcp_punch(&mut self, now: Instant) {
        let Some(tcp) = &mut self.tcp_punch else { return };
        if tcp.is_established() {
            return;
        }
        tcp.tick(now);
        if let Some(addr) = tcp.peer_addr() {
            log::info!("{}: tcp simultaneous-open succeeded via {addr}", self.peer_id);
        }
    }

    fn drive_transport(&mut self, now: Instant) {
        if self.transport.tick(now).is_err() {
            self.fatal(FatalKind::ConnectionLost);
        }
    }

    fn provider_tick(&mut self, now: Instant) {
        match &mut self.provider {
            Some(Provider::Stateful(c)) => c.tick(now),
            Some(Provider::Simple(c)) => c.tick(now),
            Some(Provider::PubSub(c)) => {
                if let Err(e) = c.tick(now) {
                    log::warn!("blob store poll failed: {e}");
                }
            }
            None => {}
        }
    }

    /// Polls the external srflx/relay collaborator and pushes every
    /// not-yet-announced local candidate through the signaling plane.
    fn trickle_local(&mut self, now: Instant) {
        if let Some(source) = &mut self.reflexive {
            while let Some((kind, addr, base)) = source.poll() {
                self.engine.add_local(kind, addr, base);
            }
        }

        let total = self.engine.local_candidates().len();
        if total <= self.candidates_sent {
            return;
        }
        let new_records: Vec<CandidateRecord> = self.engine.local_candidates()
            [self.candidates_sent..]
            .iter()
            .map(Candidate::to_record)
            .collect();
        let ready = self.is_ready();

        let sent = match &mut self.provider {
            Some(Provider::Stateful(c)) => {
                if ready {
                    // Mid-session changes travel as address-change
                    // notifications rather than slices.
                    let mut ok = true;
                    for rec in &new_records {
                        if c.notify_address_change(*rec, now).is_err() {
                            ok = false;
                            break;
                        }
                    }
                    ok
                } else {
                    match c.send_candidates(&new_records, now) {
                        Ok(()) => true,
                        Err(signal::Error::ErrNotRegistered) => false,
                        Err(e) => {
                            log::warn!("candidate trickle failed: {e}");
                            true
                        }
                    }
                }
            }
            Some(Provider::PubSub(c)) => match c.send_candidates(&new_records, now) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("candidate trickle failed: {e}");
                    true
                }
            },
            // The stateless registry has no trickle path.
            Some(Provider::Simple(_)) | None => true,
        };
        if sent {
            self.candidates_sent = total;
        }
    }

    fn deliver_recv(&mut self) {
        while let Some(chunk) = self.transport.recv() {
            if let Some(cb) = &mut self.on_data {
                cb(&chunk);
            } else {
                self.recv_buf.extend(chunk.iter());
            }
        }
    }

    fn on_peer_lost(&mut self) {
        log::info!("{}: peer lost, resetting", self.peer_id);
        let was_ready = self.is_ready();
        self.engine.reset_remote();
        self.punch.reset();
        if self.tcp_punch.take().is_some() {
            // Drop the pinned connection and stale targets; rebind for
            // the next incarnation.
            match TcpPunch::bind(self.local_addr.port()) {
                Ok(tcp) => self.tcp_punch = Some(tcp),
                Err(e) => log::warn!("tcp punch rebind failed: {e}"),
            }
        }
        self.transport = ReliableTransport::new();
        self.paired = false;
        self.peer_session_id = 0;
        if was_ready {
            self.notify_disconnected();
        }
        if !matches!(
            self.state,
            SessionState::Closing | SessionState::Closed | SessionState::Error
        ) {
            self.state = SessionState::Registering;
        }
    }

    fn on_remote_fin(&mut self, now: Instant) {
        self.remote_fin = true;
        match self.state {
            SessionState::Closing => {
                self.state = SessionState::Closed;
                self.close_provider();
            }
            SessionState::Closed | SessionState::Error => {}
            _ => {
                // Peer closed: echo one FIN so its close handshake
                // completes, then shut down the stream.
                self.send_fin(now);
                self.notify_disconnected();
                self.state = SessionState::Closed;
                self.close_provider();
            }
        }
    }

    pub(crate) fn send(&mut self, data: &[u8], now: Instant) -> Result<usize> {
        if matches!(
            self.state,
            SessionState::Closing | SessionState::Closed | SessionState::Error
        ) {
            return Err(self.closed_error());
        }
        if !self.is_ready() {
            return Ok(0);
        }

        let mut accepted = 0;
        for chunk in data.chunks(proto::MAX_DATA_PAYLOAD) {
            let n = self.transport.submit(chunk, now)?;
            if n == 0 {
                break;
            }
            accepted += n;
        }
        self.flush_transmits();
        Ok(accepted)
    }

    pub(crate) fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.deliver_recv();
        if self.recv_buf.is_empty() {
            if matches!(self.state, SessionState::Closed | SessionState::Error) {
                return Err(self.closed_error());
            }
            return Ok(0);
        }
        let n = buf.len().min(self.recv_buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.recv_buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    /// Idempotent. Starts the FIN exchange and the flush deadline.
    pub(crate) fn close(&mut self, now: Instant) {
        match self.state {
            SessionState::Closing | SessionState::Closed | SessionState::Error => return,
            SessionState::Idle | SessionState::Registering => {
                self.state = SessionState::Closed;
                self.close_provider();
                return;
            }
            _ => {}
        }
        log::info!("{}: closing", self.peer_id);
        self.state = SessionState::Closing;
        self.close_started = Some(now);
        self.send_fin(now);
    }

    fn drive_close(&mut self, now: Instant) {
        if self.state != SessionState::Closing {
            return;
        }
        let deadline_passed = self
            .close_started
            .map_or(true, |t| now.saturating_duration_since(t) >= CLOSE_DEADLINE);
        let flushed = self.transport.in_flight() == 0;

        if self.remote_fin || flushed || deadline_passed {
            self.state = SessionState::Closed;
            self.close_provider();
            return;
        }

        let fin_due = self
            .fin_last
            .map_or(true, |t| now.saturating_duration_since(t) >= FIN_RETRY);
        if fin_due {
            self.send_fin(now);
        }
    }

    fn send_fin(&mut self, now: Instant) {
        self.fin_last = Some(now);
        self.send_data_plane(&Packet::new(Body::Fin));
    }

    fn close_provider(&mut self) {
        match &mut self.provider {
            Some(Provider::Stateful(c)) => c.close(),
            Some(Provider::Simple(c)) => c.close(),
            Some(Provider::PubSub(c)) => c.close(),
            None => {}
        }
    }

    fn fatal(&mut self, kind: FatalKind) {
        if self.state == SessionState::Error {
            return;
        }
        log::error!("{}: fatal: {}", self.peer_id, kind.to_error());
        self.state = SessionState::Error;
        self.fatal_kind = Some(kind);
        self.close_provider();
        self.notify_disconnected();
    }

    fn closed_error(&self) -> Error {
        match self.fatal_kind {
            Some(kind) => kind.to_error(),
            None => Error::ErrClosed,
        }
    }

    fn notify_disconnected(&mut self) {
        if self.disconnect_notified {
            return;
        }
        self.disconnect_notified = true;
        if let Some(cb) = &mut self.on_disconnected {
            cb();
        }
    }

    fn flush_transmits(&mut self) {
        while let Some((addr, pkt)) = self.punch.poll_transmit() {
            let _ = self.socket.send_to(&pkt.encode(), addr);
        }

        match &mut self.provider {
            Some(Provider::Stateful(c)) => {
                while let Some((addr, pkt)) = c.poll_transmit() {
                    let _ = self.socket.send_to(&pkt.encode(), addr);
                }
            }
            Some(Provider::Simple(c)) => {
                while let Some((addr, frame)) = c.poll_transmit() {
                    let _ = self.socket.send_to(&frame, addr);
                }
            }
            Some(Provider::PubSub(_)) | None => {}
        }

        while let Some(pkt) = self.transport.poll_transmit() {
            self.send_data_plane(&pkt);
        }
    }

    /// Routes one data-plane packet over the active path: direct to
    /// the punched address, or wrapped in RELAY_DATA through the
    /// server.
    fn send_data_plane(&mut self, pkt: &Packet) {
        if self.punch.state() == PunchState::Relay {
            let Some(server) = self.server_addr else { return };
            let wrapped = Packet::new(Body::RelayData {
                session_id: self.session_id,
                inner: pkt.encode(),
            });
            let _ = self.socket.send_to(&wrapped.encode(), server);
            return;
        }
        if let Some(addr) = self.punch.active_addr() {
            let _ = self.socket.send_to(&pkt.encode(), addr);
        }
    }
}

fn resolve_v4(host: &str, port: u16) -> Result<SocketAddrV4> {
    let addrs = (host, port).to_socket_addrs()?;
    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Ok(v4);
        }
    }
    Err(Error::ErrServerAddr)
}
