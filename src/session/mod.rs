
mod session_internal;

use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::error::Result;
use session_internal::SessionInner;

/// Top-level session state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,

    /// Registering with the signaling plane and gathering candidates.
    Registering,

    /// Connectivity checks and hole punching are underway.
    Punching,

    /// A direct path is open; the byte-stream is live.
    Connected,

    /// No direct path; traffic rides the server relay.
    Relay,

    /// FIN exchange and retransmit flush in progress.
    Closing,

    Closed,

    /// A fatal error stopped the session; `send`/`recv` fail fast.
    Error,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Idle => "idle",
            Self::Registering => "registering",
            Self::Punching => "punching",
            Self::Connected => "connected",
            Self::Relay => "relay",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Which kind of path carries the byte-stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathKind {
    None,
    /// A hole punched through both NATs.
    Punch,
    /// The LAN shortcut: peers share a subnet and probed each other.
    Lan,
    /// Datagrams wrapped and forwarded by the rendezvous server.
    Relay,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::None => "none",
            Self::Punch => "punch",
            Self::Lan => "lan",
            Self::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

/// One peer-to-peer session: a reliable byte-stream to a single remote
/// peer, reached through signaling, hole punching and, failing that, a
/// server relay.
///
/// A session owns its UDP socket for its whole lifetime. It advances
/// only inside `tick` — call it at a ~10 ms cadence, or set
/// `threaded` in the config to let an internal thread drive it.
/// Callbacks run on whichever thread ticks; do not call back into the
/// session from inside them.
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
    running: Arc<AtomicBool>,
    driver: Option<thread::JoinHandle<()>>,
}

impl Session {
    /// Validates the config, binds the UDP socket and, when
    /// configured, starts the internal driver thread.
    pub fn create(config: SessionConfig) -> Result<Session> {
        config.validate()?;
        let threaded = config.threaded;
        let interval = Duration::from_millis(u64::from(config.update_interval_ms));

        let inner = Arc::new(Mutex::new(SessionInner::new(config)?));
        let running = Arc::new(AtomicBool::new(true));

        let driver = if threaded {
            let inner = Arc::clone(&inner);
            let running = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name("natlink-session".to_owned())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        {
                            let mut guard =
                                inner.lock().unwrap_or_else(|e| e.into_inner());
                            guard.tick(Instant::now());
                        }
                        thread::sleep(interval);
                    }
                })?;
            Some(handle)
        } else {
            None
        };

        Ok(Session {
            inner,
            running,
            driver,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts registration. `None` takes the passive role, waiting for
    /// any offerer to name us.
    pub fn connect(&self, remote: Option<&str>) -> Result<()> {
        self.lock().connect(remote, Instant::now())
    }

    /// Drives all timers; needed at a <= 10 ms cadence unless the
    /// session is threaded.
    pub fn tick(&self) {
        self.lock().tick(Instant::now());
    }

    /// Queues application bytes. Returns how many bytes were accepted
    /// (0 when the send window is full); fails once the session is
    /// closed or dead.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.lock().send(data, Instant::now())
    }

    /// Non-blocking read of the ordered byte-stream; 0 means no data
    /// available right now. Buffered data stays readable after close.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.lock().recv(buf)
    }

    /// Begins the FIN exchange and flushes in-flight data, bounded by
    /// the close deadline. Idempotent.
    pub fn close(&self) {
        self.lock().close(Instant::now());
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn path(&self) -> PathKind {
        self.lock().path()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    /// The bound local endpoint.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.lock().local_addr()
    }

    /// Server-assigned session id; 0 until registered.
    pub fn session_id(&self) -> u64 {
        self.lock().session_id()
    }

    /// Peer endpoint of the TCP simultaneous-open punch, once one of
    /// the crossing connects lands. Requires `enable_tcp`; the
    /// byte-stream itself stays on the UDP plane either way.
    pub fn tcp_path(&self) -> Option<SocketAddrV4> {
        self.lock().tcp_path()
    }

    /// Smoothed RTT of the reliable transport, in msec.
    pub fn srtt_ms(&self) -> Option<u64> {
        self.lock().srtt_ms()
    }

    pub fn transport_stats(&self) -> transport::TransportStats {
        self.lock().transport_stats()
    }

    /// Malformed datagrams dropped so far.
    pub fn dropped_malformed(&self) -> u64 {
        self.lock().dropped_malformed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.lock().close(Instant::now());
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
    }
}
