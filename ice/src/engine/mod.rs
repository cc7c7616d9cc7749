
use std::net::SocketAddrV4;

use proto::CandidateKind;

use crate::candidate::{Candidate, CandidatePair, CandidatePairState};
use crate::state::IceState;
use crate::DEFAULT_LOCAL_PREFERENCE;

/// Maintains the local and remote candidate sets and the ordered pair
/// list, and nominates the winning pair.
///
/// The local set is append-only for the lifetime of a session. The
/// remote set is append-only too, except for the wholesale replacement
/// used by the PUB/SUB provider's reset-on-first-offer rule and the
/// reset that follows a peer disconnect.
pub struct CandidateEngine {
    controlling: bool,
    state: IceState,
    local: Vec<Candidate>,
    remote: Vec<Candidate>,
    pairs: Vec<CandidatePair>,
    nominated: Option<usize>,
}

impl CandidateEngine {
    pub fn new(controlling: bool) -> Self {
        CandidateEngine {
            controlling,
            state: IceState::Init,
            local: Vec::new(),
            remote: Vec::new(),
            pairs: Vec::new(),
            nominated: None,
        }
    }

    pub fn state(&self) -> IceState {
        self.state
    }

    pub fn controlling(&self) -> bool {
        self.controlling
    }

    /// Re-keys every pair priority; used when the role is settled by
    /// the registration tie-breaker.
    pub fn set_controlling(&mut self, controlling: bool) {
        if self.controlling != controlling {
            self.controlling = controlling;
            self.reform_pairs();
        }
    }

    pub fn begin_gathering(&mut self) {
        self.state = IceState::Gathering;
    }

    pub fn gathering_done(&mut self) {
        if self.state == IceState::Gathering {
            self.state = IceState::GatheringDone;
        }
    }

    /// Enters the checking state and unfreezes the best pair.
    pub fn begin_checking(&mut self) {
        self.state = IceState::Checking;
        self.unfreeze_top();
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote
    }

    pub fn pairs(&self) -> &[CandidatePair] {
        &self.pairs
    }

    pub fn nominated_pair(&self) -> Option<&CandidatePair> {
        self.nominated.map(|i| &self.pairs[i])
    }

    /// Appends a locally discovered candidate, deduplicating on
    /// (kind, address). Returns the stored candidate for trickle
    /// broadcast, `None` for a duplicate.
    pub fn add_local(
        &mut self,
        kind: CandidateKind,
        addr: SocketAddrV4,
        base_addr: SocketAddrV4,
    ) -> Option<Candidate> {
        if self.local.iter().any(|c| c.kind == kind && c.addr == addr) {
            return None;
        }
        // Unique local preference per candidate of the same kind keeps
        // priorities distinct.
        let same_kind = self.local.iter().filter(|c| c.kind == kind).count() as u16;
        let cand = Candidate::with_local_preference(
            kind,
            addr,
            base_addr,
            DEFAULT_LOCAL_PREFERENCE - same_kind,
        );
        log::debug!("local candidate gathered: {cand}");
        self.local.push(cand.clone());
        self.reform_pairs();
        Some(cand)
    }

    /// Inserts a remote candidate and recomputes the pair set.
    ///
    /// Returns whether the set changed. A peer-reflexive candidate
    /// whose address collides with an advertised one takes the
    /// advertised candidate's place: it was learned from a packet that
    /// actually arrived, which is stronger evidence of reachability.
    pub fn add_remote(&mut self, cand: Candidate) -> bool {
        if self
            .remote
            .iter()
            .any(|c| c.kind == cand.kind && c.addr == cand.addr)
        {
            return false;
        }
        if let Some(existing) = self.remote.iter_mut().find(|c| c.addr == cand.addr) {
            if cand.kind == CandidateKind::PeerReflexive {
                *existing = cand;
                self.reform_pairs();
                return true;
            }
            // The address is already covered; keep the incumbent.
            return false;
        }
        log::debug!("remote candidate added: {cand}");
        self.remote.push(cand);
        self.reform_pairs();
        true
    }

    /// Replaces the whole remote set (reset-on-first-offer).
    pub fn replace_remote(&mut self, cands: Vec<Candidate>) {
        self.remote.clear();
        self.pairs.clear();
        self.nominated = None;
        for c in cands {
            self.add_remote(c);
        }
    }

    /// Clears all remote state after a peer disconnect. Local
    /// candidates survive; they are append-only within the session.
    pub fn reset_remote(&mut self) {
        self.remote.clear();
        self.pairs.clear();
        self.nominated = None;
        self.state = if self.local.is_empty() {
            IceState::Init
        } else {
            IceState::GatheringDone
        };
    }

    /// Remote addresses in connectivity-check order: best pair first,
    /// deduplicated.
    pub fn check_order(&self) -> Vec<SocketAddrV4> {
        let mut order = Vec::with_capacity(self.remote.len());
        for pair in &self.pairs {
            if !order.contains(&pair.remote.addr) {
                order.push(pair.remote.addr);
            }
        }
        order
    }

    /// Marks every eligible pair toward `remote_addr` as in-progress.
    pub fn mark_in_progress(&mut self, remote_addr: SocketAddrV4) {
        for pair in &mut self.pairs {
            if pair.remote.addr == remote_addr
                && matches!(
                    pair.state,
                    CandidatePairState::Frozen | CandidatePairState::Waiting
                )
            {
                pair.state = CandidatePairState::InProgress;
            }
        }
    }

    /// Records a connectivity success from `remote_addr` and nominates.
    ///
    /// An unknown source address becomes a peer-reflexive candidate
    /// first. The first nominated pair wins; later successes only
    /// update pair bookkeeping. Returns the active remote address when
    /// a nomination happened.
    pub fn on_success(&mut self, remote_addr: SocketAddrV4) -> Option<SocketAddrV4> {
        if !self.remote.iter().any(|c| c.addr == remote_addr) {
            let cand = Candidate::new(CandidateKind::PeerReflexive, remote_addr, remote_addr);
            log::debug!("learned peer-reflexive candidate: {cand}");
            self.remote.push(cand);
            self.reform_pairs();
        }

        let mut succeeded = None;
        for (i, pair) in self.pairs.iter_mut().enumerate() {
            if pair.remote.addr == remote_addr {
                pair.state = CandidatePairState::Succeeded;
                if succeeded.is_none() {
                    succeeded = Some(i);
                }
            }
        }

        if self.nominated.is_some() {
            return None;
        }
        let idx = succeeded?;
        self.pairs[idx].nominated = true;
        self.nominated = Some(idx);
        self.state = IceState::Nominated;
        log::info!("nominated pair: {}", self.pairs[idx]);
        Some(remote_addr)
    }

    /// Fails every pair that never succeeded (punch deadline).
    pub fn mark_failed(&mut self) {
        for pair in &mut self.pairs {
            if pair.state != CandidatePairState::Succeeded {
                pair.state = CandidatePairState::Failed;
            }
        }
    }

    fn unfreeze_top(&mut self) {
        let busy = self.pairs.iter().any(|p| {
            matches!(
                p.state,
                CandidatePairState::Waiting | CandidatePairState::InProgress
            )
        });
        if busy {
            return;
        }
        if let Some(pair) = self
            .pairs
            .iter_mut()
            .find(|p| p.state == CandidatePairState::Frozen)
        {
            pair.state = CandidatePairState::Waiting;
        }
    }

    /// Rebuilds the cartesian product, carrying over the state of the
    /// pairs that survive, and re-sorts by pair priority.
    fn reform_pairs(&mut self) {
        let old = std::mem::take(&mut self.pairs);
        let mut pairs = Vec::with_capacity(self.local.len() * self.remote.len());
        for l in &self.local {
            for r in &self.remote {
                let mut pair = CandidatePair::new(l.clone(), r.clone(), self.controlling);
                if let Some(prev) = old.iter().find(|o| {
                    o.local.kind == l.kind
                        && o.local.addr == l.addr
                        && o.remote.kind == r.kind
                        && o.remote.addr == r.addr
                }) {
                    pair.state = prev.state;
                    pair.nominated = prev.nominated;
                }
                pairs.push(pair);
            }
        }
        pairs.sort_by_key(|p| p.sort_key());
        self.pairs = pairs;
        self.nominated = self.pairs.iter().position(|p| p.nominated);
        if self.state == IceState::Checking {
            self.unfreeze_top();
        }
    }
}
