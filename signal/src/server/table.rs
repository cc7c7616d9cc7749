
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use slab::Slab;

use proto::{CandidateRecord, PeerId, Register};

/// How an entry relates to its reverse pair.
///
/// The table is a slab of entries; links are indices, with `Dangling`
/// standing in for a partner that disappeared after having been paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLink {
    Unpaired,
    Linked(usize),
    Dangling,
}

/// Where a registered client is reachable for signaling replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Udp(SocketAddrV4),
    /// Index of a "RELY"-framed stream connection.
    Stream(usize),
}

#[derive(Debug)]
pub struct PairEntry {
    pub local_id: PeerId,
    /// Empty for a passive registration until a partner adopts it.
    pub remote_id: PeerId,
    pub session_id: u64,
    pub route: Route,
    /// Data-plane mapping, used for relay forwarding. Only known for
    /// clients that registered over UDP.
    pub udp_endpoint: Option<SocketAddrV4>,
    pub tie_breaker: u64,
    pub last_seen: Instant,
    pub link: PeerLink,
    pub cache: Vec<CandidateRecord>,
}

pub struct RegisterOutcome {
    pub idx: usize,
    /// Partner index when this registration completed a pair.
    pub linked: Option<usize>,
    pub peer_online: bool,
}

/// The rendezvous pair table: `(local_id, remote_id) -> entry`.
pub struct PairTable {
    entries: Slab<PairEntry>,
    index: FxHashMap<(String, String), usize>,
    max_cache: usize,
}

impl PairTable {
    pub fn new(max_cache: usize) -> Self {
        PairTable {
            entries: Slab::new(),
            index: FxHashMap::default(),
            max_cache,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_cache(&self) -> usize {
        self.max_cache
    }

    pub fn get(&self, idx: usize) -> Option<&PairEntry> {
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut PairEntry> {
        self.entries.get_mut(idx)
    }

    pub fn touch(&mut self, idx: usize, now: Instant) {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.last_seen = now;
        }
    }

    pub fn find_by_session(&self, session_id: u64) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, e)| e.session_id == session_id)
            .map(|(i, _)| i)
    }

    /// Finds the entry registered as `(local, remote)`, falling back to
    /// the passive `(local, "")` form.
    pub fn find_pair(&self, local: &PeerId, remote: &PeerId) -> Option<usize> {
        let key = (local.as_str().to_owned(), remote.as_str().to_owned());
        if let Some(&idx) = self.index.get(&key) {
            return Some(idx);
        }
        let passive = (local.as_str().to_owned(), String::new());
        self.index.get(&passive).copied()
    }

    /// First entry registered under `local`, regardless of its remote
    /// key. Covers senders that registered passively and were re-keyed
    /// by adoption before learning their partner's id.
    pub fn find_by_local(&self, local: &PeerId) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, e)| e.local_id == *local)
            .map(|(i, _)| i)
    }

    /// The live partner of an entry, if any.
    pub fn peer_of(&self, idx: usize) -> Option<usize> {
        match self.entries.get(idx)?.link {
            PeerLink::Linked(p) if self.entries.contains(p) => Some(p),
            _ => None,
        }
    }

    /// Creates or refreshes the entry for a REGISTER and links the
    /// reverse pair, first match wins.
    pub fn register(
        &mut self,
        reg: &Register,
        route: Route,
        observed: Option<SocketAddrV4>,
        now: Instant,
    ) -> RegisterOutcome {
        let key = (
            reg.local_id.as_str().to_owned(),
            reg.remote_id.as_str().to_owned(),
        );
        let idx = match self.index.get(&key) {
            Some(&idx) => {
                let entry = &mut self.entries[idx];
                entry.route = route;
                if observed.is_some() {
                    entry.udp_endpoint = observed;
                }
                entry.tie_breaker = reg.tie_breaker;
                entry.last_seen = now;
                idx
            }
            None => {
                let session_id = loop {
                    let id: u64 = rand::random();
                    if id != 0 {
                        break id;
                    }
                };
                let idx = self.entries.insert(PairEntry {
                    local_id: reg.local_id.clone(),
                    remote_id: reg.remote_id.clone(),
                    session_id,
                    route,
                    udp_endpoint: observed,
                    tie_breaker: reg.tie_breaker,
                    last_seen: now,
                    link: PeerLink::Unpaired,
                    cache: Vec::new(),
                });
                self.index.insert(key, idx);
                idx
            }
        };

        self.cache_candidates(idx, &reg.candidates);

        let linked = self.try_link(idx);
        let peer_online = self.peer_of(idx).is_some();
        RegisterOutcome {
            idx,
            linked,
            peer_online,
        }
    }

    /// Links `idx` with its reverse entry. Returns the partner index
    /// only when a new link was formed by this call.
    fn try_link(&mut self, idx: usize) -> Option<usize> {
        if self.peer_of(idx).is_some() {
            return None;
        }
        let (local, remote) = {
            let e = &self.entries[idx];
            (e.local_id.clone(), e.remote_id.clone())
        };
        if remote.is_empty() {
            // Passive registrations wait to be adopted.
            return None;
        }

        // Reverse pair: the partner registered toward us, or passively.
        let partner = self.entries.iter().find_map(|(i, e)| {
            if i != idx
                && e.local_id == remote
                && (e.remote_id == local || e.remote_id.is_empty())
                && !matches!(e.link, PeerLink::Linked(_))
            {
                Some(i)
            } else {
                None
            }
        })?;

        // Adopt a passive partner: its key moves from (id, "") to
        // (id, local).
        if self.entries[partner].remote_id.is_empty() {
            let old_key = (remote.as_str().to_owned(), String::new());
            self.index.remove(&old_key);
            self.entries[partner].remote_id = local.clone();
            self.index.insert(
                (remote.as_str().to_owned(), local.as_str().to_owned()),
                partner,
            );
        }

        self.entries[idx].link = PeerLink::Linked(partner);
        self.entries[partner].link = PeerLink::Linked(idx);
        log::debug!("paired {local} <-> {remote}");
        Some(partner)
    }

    /// Appends candidates to an entry's bounded cache, deduplicating
    /// on (kind, address).
    pub fn cache_candidates(&mut self, idx: usize, records: &[CandidateRecord]) {
        let max_cache = self.max_cache;
        let Some(entry) = self.entries.get_mut(idx) else {
            return;
        };
        for rec in records {
            if entry.cache.len() >= max_cache {
                break;
            }
            if entry
                .cache
                .iter()
                .any(|c| c.kind == rec.kind && c.addr == rec.addr)
            {
                continue;
            }
            entry.cache.push(*rec);
        }
    }

    /// Removes entries not seen within `timeout`. Returns
    /// `(partner_idx, dead_session_id)` notifications for partners that
    /// just lost their pair.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<(usize, u64)> {
        let dead: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) >= timeout)
            .map(|(i, _)| i)
            .collect();

        let mut notify = Vec::new();
        for idx in dead {
            let entry = self.entries.remove(idx);
            self.index.remove(&(
                entry.local_id.as_str().to_owned(),
                entry.remote_id.as_str().to_owned(),
            ));
            log::debug!("expired {} -> {}", entry.local_id, entry.remote_id);
            if let PeerLink::Linked(partner) = entry.link {
                if let Some(p) = self.entries.get_mut(partner) {
                    p.link = PeerLink::Dangling;
                    notify.push((partner, entry.session_id));
                }
            }
        }
        notify
    }

    /// Removes one entry immediately (stream disconnect), with the same
    /// partner notification contract as `sweep`.
    pub fn remove(&mut self, idx: usize) -> Option<(usize, u64)> {
        if !self.entries.contains(idx) {
            return None;
        }
        let entry = self.entries.remove(idx);
        self.index.remove(&(
            entry.local_id.as_str().to_owned(),
            entry.remote_id.as_str().to_owned(),
        ));
        if let PeerLink::Linked(partner) = entry.link {
            if let Some(p) = self.entries.get_mut(partner) {
                p.link = PeerLink::Dangling;
                return Some((partner, entry.session_id));
            }
        }
        None
    }

    /// Entries whose signaling route is the given stream connection.
    pub fn find_by_stream(&self, conn: usize) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, e)| e.route == Route::Stream(conn))
            .map(|(i, _)| i)
    }
}
