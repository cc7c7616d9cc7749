
pub mod tcp;

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use proto::{Body, Packet, FLAG_RESPONSE};

use crate::error::{Error, Result};
use crate::gather::same_subnet24;
use crate::state::PunchState;

/// First retry interval for a punch target, in msec.
pub const PUNCH_INTERVAL_INITIAL_MS: u64 = 40;
/// Ceiling for the per-target retry interval, in msec.
pub const PUNCH_INTERVAL_MAX_MS: u64 = 500;
/// Overall deadline before falling back to a relay.
pub const PUNCH_DEADLINE: Duration = Duration::from_secs(8);

/// A probe round trip must finish below this to take the LAN shortcut.
const LAN_PROBE_RTT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PunchTarget {
    addr: SocketAddrV4,
    last_send: Option<Instant>,
    interval: Duration,
    probe_sent: Option<Instant>,
}

impl PunchTarget {
    fn new(addr: SocketAddrV4) -> Self {
        PunchTarget {
            addr,
            last_send: None,
            interval: Duration::from_millis(PUNCH_INTERVAL_INITIAL_MS),
            probe_sent: None,
        }
    }
}

/// Drives the punch/punch-ack exchange against every remote candidate
/// address until one answers, then publishes it as the active address.
///
/// A target's punch is retried on a growing schedule (40 ms doubling up
/// to 500 ms); the overall deadline falls back to the relay path when
/// one is available and fails the session otherwise. Targets that share
/// a /24 with a local interface may be promoted early through a
/// ROUTE_PROBE round trip (the LAN shortcut), but never without a probe
/// reply.
pub struct PunchEngine {
    state: PunchState,
    targets: Vec<PunchTarget>,
    started_at: Option<Instant>,
    deadline: Duration,
    active: Option<SocketAddrV4>,
    relay_available: bool,
    lan_shortcut: bool,
    lan_path: bool,
    local_ips: Vec<Ipv4Addr>,
    transmits: VecDeque<(SocketAddrV4, Packet)>,
}

impl PunchEngine {
    pub fn new(lan_shortcut: bool) -> Self {
        PunchEngine {
            state: PunchState::Init,
            targets: Vec::new(),
            started_at: None,
            deadline: PUNCH_DEADLINE,
            active: None,
            relay_available: false,
            lan_shortcut,
            lan_path: false,
            local_ips: Vec::new(),
            transmits: VecDeque::new(),
        }
    }

    /// True when the active path came from the LAN shortcut rather
    /// than a punch round trip.
    pub fn is_lan_path(&self) -> bool {
        self.lan_path
    }

    pub fn state(&self) -> PunchState {
        self.state
    }

    /// The address a punch succeeded against, once connected.
    pub fn active_addr(&self) -> Option<SocketAddrV4> {
        self.active
    }

    pub fn relay_available(&self) -> bool {
        self.relay_available
    }

    pub fn set_relay_available(&mut self, available: bool) {
        self.relay_available = available;
    }

    /// Local interface addresses used for the on-link test.
    pub fn set_local_ips(&mut self, ips: Vec<Ipv4Addr>) {
        self.local_ips = ips;
    }

    #[cfg(test)]
    pub(crate) fn set_deadline(&mut self, deadline: Duration) {
        self.deadline = deadline;
    }

    fn punching(&self) -> bool {
        matches!(self.state, PunchState::Probing | PunchState::Punching)
    }

    /// Starts punching every target. Targets are contacted in the order
    /// given, so the caller passes them sorted by pair priority.
    pub fn begin(&mut self, targets: &[SocketAddrV4], now: Instant) -> Result<()> {
        if targets.is_empty() {
            return Err(Error::ErrNoRemoteCandidates);
        }
        let on_link = self.lan_shortcut && targets.iter().any(|a| self.on_link(a));
        self.state = if on_link {
            PunchState::Probing
        } else {
            PunchState::Punching
        };
        self.started_at = Some(now);
        for addr in targets {
            self.add_target(*addr, now);
        }
        Ok(())
    }

    /// Adds a trickled target; when punching is already underway the
    /// first punch goes out immediately rather than on the next tick.
    pub fn add_target(&mut self, addr: SocketAddrV4, now: Instant) {
        if self.targets.iter().any(|t| t.addr == addr) {
            return;
        }
        let mut target = PunchTarget::new(addr);
        if self.punching() {
            self.transmits
                .push_back((addr, Packet::with_seq(Body::Punch, 0)));
            target.last_send = Some(now);
            if self.lan_shortcut && self.on_link(&addr) {
                target.probe_sent = Some(now);
                self.transmits.push_back((addr, Packet::new(Body::RouteProbe)));
            }
        }
        self.targets.push(target);
    }

    fn on_link(&self, addr: &SocketAddrV4) -> bool {
        self.local_ips
            .iter()
            .any(|ip| same_subnet24(ip, addr.ip()))
    }

    /// Handles an inbound PUNCH: always answer, and treat the source
    /// as proof of reachability.
    pub fn on_punch(&mut self, from: SocketAddrV4, _now: Instant) {
        self.transmits.push_back((from, Packet::new(Body::PunchAck)));
        if self.state != PunchState::Connected {
            self.promote(from);
        }
    }

    pub fn on_punch_ack(&mut self, from: SocketAddrV4, _now: Instant) {
        if self.state != PunchState::Connected {
            self.promote(from);
        }
    }

    /// Answers a route probe with the response flag set.
    pub fn on_route_probe(&mut self, from: SocketAddrV4) {
        let mut reply = Packet::new(Body::RouteProbe);
        reply.flags |= FLAG_RESPONSE;
        self.transmits.push_back((from, reply));
    }

    /// A probe reply under the RTT bound promotes the on-link target.
    pub fn on_route_probe_response(&mut self, from: SocketAddrV4, now: Instant) {
        if !self.lan_shortcut || self.state == PunchState::Connected {
            return;
        }
        let Some(target) = self.targets.iter().find(|t| t.addr == from) else {
            return;
        };
        let Some(sent) = target.probe_sent else {
            return;
        };
        if now.saturating_duration_since(sent) < LAN_PROBE_RTT {
            self.promote(from);
            self.lan_path = true;
        }
    }

    fn promote(&mut self, addr: SocketAddrV4) {
        log::debug!("punch connected via {addr}");
        self.active = Some(addr);
        self.state = PunchState::Connected;
    }

    /// Applies an accepted address-change notification. This is the
    /// only way the active address moves once set.
    pub fn force_active(&mut self, addr: SocketAddrV4) {
        log::debug!("active address changed to {addr}");
        self.active = Some(addr);
        if self.state != PunchState::Relay {
            self.state = PunchState::Connected;
        }
    }

    /// Drives the retry schedule and the overall deadline.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if !self.punching() {
            return Ok(());
        }

        if let Some(started) = self.started_at {
            if now.saturating_duration_since(started) >= self.deadline {
                if self.relay_available {
                    log::info!("punch deadline passed, falling back to relay");
                    self.state = PunchState::Relay;
                    return Ok(());
                }
                return Err(Error::ErrPunchTimeout);
            }
        }

        for target in &mut self.targets {
            let due = target
                .last_send
                .map_or(true, |t| now.saturating_duration_since(t) >= target.interval);
            if !due {
                continue;
            }
            self.transmits
                .push_back((target.addr, Packet::with_seq(Body::Punch, 0)));
            target.last_send = Some(now);
            target.interval =
                (target.interval * 2).min(Duration::from_millis(PUNCH_INTERVAL_MAX_MS));
        }
        Ok(())
    }

    /// Next outbound datagram and its destination, if any.
    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<(SocketAddrV4, Packet)> {
        self.transmits.pop_front()
    }

    /// Clears all punch state after a peer disconnect.
    pub fn reset(&mut self) {
        self.state = PunchState::Init;
        self.targets.clear();
        self.started_at = None;
        self.active = None;
        self.lan_path = false;
        self.transmits.clear();
    }
}
