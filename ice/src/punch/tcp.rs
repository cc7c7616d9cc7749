
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::Result;

/// How long one connect attempt may stay pending before it is torn
/// down and restarted.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Wait between restarts of a dead connect.
const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

struct TcpTarget {
    addr: SocketAddrV4,
    socket: Option<Socket>,
    started: Option<Instant>,
    last_attempt: Option<Instant>,
}

impl TcpTarget {
    fn new(addr: SocketAddrV4) -> Self {
        TcpTarget {
            addr,
            socket: None,
            started: None,
            last_attempt: None,
        }
    }
}

/// TCP simultaneous-open punch, run alongside the UDP punch.
///
/// A listener and every outgoing connect share the advertised local
/// port (SO_REUSEADDR, plus SO_REUSEPORT where the platform has it),
/// so both NATs see crossing SYNs the way they see crossing UDP
/// punches. The first accepted or completed connection is kept open to
/// pin the mapping; the byte-stream itself stays on the UDP plane.
pub struct TcpPunch {
    listener: TcpListener,
    local_port: u16,
    targets: Vec<TcpTarget>,
    established: Option<(TcpStream, SocketAddrV4)>,
}

impl TcpPunch {
    /// Binds the shared-port listener; 0 picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        )))?;
        socket.listen(8)?;

        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        let local_port = match listener.local_addr()? {
            SocketAddr::V4(a) => a.port(),
            SocketAddr::V6(_) => 0,
        };
        Ok(TcpPunch {
            listener,
            local_port,
            targets: Vec::new(),
            established: None,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_established(&self) -> bool {
        self.established.is_some()
    }

    /// The peer endpoint of the pinned connection, once open.
    pub fn peer_addr(&self) -> Option<SocketAddrV4> {
        self.established.as_ref().map(|(_, addr)| *addr)
    }

    /// Starts a simultaneous-open attempt toward `addr`; duplicates
    /// are ignored.
    pub fn add_target(&mut self, addr: SocketAddrV4, now: Instant) {
        if self.targets.iter().any(|t| t.addr == addr) {
            return;
        }
        let mut target = TcpTarget::new(addr);
        start_connect(&mut target, self.local_port, now);
        self.targets.push(target);
    }

    /// Drives accepts, connect completion and the retry schedule.
    pub fn tick(&mut self, now: Instant) {
        if self.established.is_some() {
            return;
        }

        self.accept_pending();
        if self.established.is_some() {
            return;
        }

        let local_port = self.local_port;
        let mut done = None;
        for target in &mut self.targets {
            if target.socket.is_none() {
                let due = target
                    .last_attempt
                    .map_or(true, |t| now.saturating_duration_since(t) >= RECONNECT_INTERVAL);
                if due {
                    start_connect(target, local_port, now);
                }
                continue;
            }

            let connected = target
                .socket
                .as_ref()
                .map_or(false, |s| s.peer_addr().is_ok());
            if connected {
                if let Some(socket) = target.socket.take() {
                    let stream: TcpStream = socket.into();
                    let _ = stream.set_nonblocking(true);
                    done = Some((stream, target.addr));
                }
                break;
            }

            let failed = target
                .socket
                .as_ref()
                .and_then(|s| s.take_error().ok().flatten())
                .is_some();
            let stale = target
                .started
                .map_or(false, |t| now.saturating_duration_since(t) >= CONNECT_TIMEOUT);
            if failed || stale {
                target.socket = None;
                target.last_attempt = Some(now);
            }
        }

        if let Some((stream, addr)) = done {
            log::debug!("tcp punch connected to {addr}");
            self.established = Some((stream, addr));
        }
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let SocketAddr::V4(peer) = peer else { continue };
                    let _ = stream.set_nonblocking(true);
                    log::debug!("tcp punch accepted from {peer}");
                    self.established = Some((stream, peer));
                    return;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::trace!("tcp accept failed: {e}");
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn target_count(&self) -> usize {
        self.targets.len()
    }
}

fn start_connect(target: &mut TcpTarget, local_port: u16, now: Instant) {
    target.last_attempt = Some(now);
    let socket = match connect_socket(local_port) {
        Ok(socket) => socket,
        Err(e) => {
            log::trace!("tcp punch socket setup failed: {e}");
            return;
        }
    };
    // A non-blocking connect finishes on a later tick; immediate
    // refusals surface through take_error there too.
    let _ = socket.connect(&SockAddr::from(target.addr));
    target.socket = Some(socket);
    target.started = Some(now);
}

fn connect_socket(local_port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    // Sharing the advertised port makes the outbound SYN match the
    // mapping the peer punches toward; fall back to an ephemeral
    // source when the platform refuses the shared bind.
    let shared = SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port));
    if let Err(e) = socket.bind(&shared) {
        log::trace!("shared-port bind failed, using ephemeral source: {e}");
    }
    Ok(socket)
}
