
mod seal;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use proto::{decode_candidate_list, encode_candidate_list, CandidateRecord};

use crate::error::Result;
use crate::event::{SignalEvent, SignalState};

/// How often the Publisher re-reads the blob: it is waiting for the
/// low-latency answer.
pub const PUBLISH_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How often the Subscriber re-reads the blob.
pub const SUBSCRIBE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The shared mutable blob both peers poll. A remote KV resource in
/// production; an in-memory cell in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    pub offer: Option<String>,
    pub answer: Option<String>,
}

/// Storage backing a PUB/SUB channel. HTTP KV backends implement this
/// outside the engine; only the load/store contract matters here.
pub trait BlobStore {
    fn load(&mut self) -> Result<Blob>;
    fn store(&mut self, blob: &Blob) -> Result<()>;
}

/// Blob cell shared between two in-process peers, for tests and local
/// demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&mut self) -> Result<Blob> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn store(&mut self, blob: &Blob) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = blob.clone();
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PubSubRole {
    /// Writes the offer, polls for the answer.
    Publisher,
    /// Polls for the offer, answers at most once per accepted offer.
    Subscriber,
}

/// Shared-blob offer/answer signaling.
///
/// Candidate payloads are sealed with ChaCha20-Poly1305 under a key
/// derived from the shared `auth_key` and base64-framed into the blob.
/// The Subscriber applies reset-on-first-offer: every accepted offer
/// replaces any previously learned remote candidate state.
pub struct PubSubChannel {
    store: Box<dyn BlobStore + Send>,
    role: PubSubRole,
    key: [u8; 32],
    state: SignalState,
    local_records: Vec<CandidateRecord>,
    last_poll: Option<Instant>,
    /// Hash of the offer we accepted (and answered) last.
    accepted_offer: Option<u64>,
    got_answer: bool,
    events: VecDeque<SignalEvent>,
}

impl PubSubChannel {
    pub fn new(store: Box<dyn BlobStore + Send>, role: PubSubRole, auth_key: &str) -> Self {
        PubSubChannel {
            store,
            role,
            key: seal::derive_key(auth_key),
            state: SignalState::Idle,
            local_records: Vec::new(),
            last_poll: None,
            accepted_offer: None,
            got_answer: false,
            events: VecDeque::new(),
        }
    }

    pub fn role(&self) -> PubSubRole {
        self.role
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    fn poll_interval(&self) -> Duration {
        match self.role {
            PubSubRole::Publisher => PUBLISH_POLL_INTERVAL,
            PubSubRole::Subscriber => SUBSCRIBE_POLL_INTERVAL,
        }
    }

    /// Publishes the initial candidate set (Publisher) or arms the
    /// offer poll (Subscriber).
    pub fn register(&mut self, candidates: Vec<CandidateRecord>, _now: Instant) -> Result<()> {
        self.local_records = candidates;
        if self.role == PubSubRole::Publisher {
            self.publish_offer()?;
        }
        self.state = SignalState::Registered;
        self.events.push_back(SignalEvent::Registered {
            session_id: 0,
            mapped: None,
            relay_available: false,
            max_candidates: 0,
            peer_online: false,
        });
        Ok(())
    }

    /// Adds candidates; the Publisher re-publishes its offer. The
    /// Subscriber never rewrites an answer it already gave.
    pub fn send_candidates(&mut self, batch: &[CandidateRecord], _now: Instant) -> Result<()> {
        for rec in batch {
            if !self
                .local_records
                .iter()
                .any(|c| c.kind == rec.kind && c.addr == rec.addr)
            {
                self.local_records.push(*rec);
            }
        }
        if self.role == PubSubRole::Publisher && self.state != SignalState::Idle {
            self.publish_offer()?;
        }
        Ok(())
    }

    fn sealed_local(&self) -> Result<String> {
        debug_assert!(self.local_records.len() <= u8::MAX as usize);
        let mut buf = BytesMut::new();
        encode_candidate_list(0, &self.local_records, &mut buf);
        seal::seal(&self.key, &buf)
    }

    fn publish_offer(&mut self) -> Result<()> {
        let sealed = self.sealed_local()?;
        let mut blob = self.store.load()?;
        blob.offer = Some(sealed);
        // A fresh offer invalidates any stale answer.
        blob.answer = None;
        self.store.store(&blob)
    }

    /// Polls the blob on the role's interval.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if !matches!(self.state, SignalState::Registered | SignalState::Ready) {
            return Ok(());
        }
        let due = self
            .last_poll
            .map_or(true, |t| now.saturating_duration_since(t) >= self.poll_interval());
        if !due {
            return Ok(());
        }
        self.last_poll = Some(now);

        let blob = self.store.load()?;
        match self.role {
            PubSubRole::Publisher => self.poll_answer(&blob),
            PubSubRole::Subscriber => self.poll_offer(blob)?,
        }
        Ok(())
    }

    fn poll_answer(&mut self, blob: &Blob) {
        if self.got_answer {
            return;
        }
        let Some(answer) = &blob.answer else {
            return;
        };
        let records = match seal::open(&self.key, answer).and_then(|p| {
            decode_candidate_list(&p).map_err(crate::error::Error::from)
        }) {
            Ok((_, records)) => records,
            Err(e) => {
                log::warn!("discarding undecryptable answer: {e}");
                self.got_answer = true;
                return;
            }
        };
        self.got_answer = true;
        self.state = SignalState::Ready;
        self.events.push_back(SignalEvent::PeerOnline);
        self.events.push_back(SignalEvent::RemoteCandidates {
            candidates: records,
            base_index: 0,
            fin: true,
            reset: false,
        });
    }

    fn poll_offer(&mut self, mut blob: Blob) -> Result<()> {
        let Some(offer) = blob.offer.clone() else {
            return Ok(());
        };
        let hash = fxhash::hash64(offer.as_bytes());
        if self.accepted_offer == Some(hash) {
            return Ok(());
        }

        let records = match seal::open(&self.key, &offer).and_then(|p| {
            decode_candidate_list(&p).map_err(crate::error::Error::from)
        }) {
            Ok((_, records)) => records,
            Err(e) => {
                log::warn!("discarding undecryptable offer: {e}");
                self.accepted_offer = Some(hash);
                return Ok(());
            }
        };

        self.accepted_offer = Some(hash);
        self.state = SignalState::Ready;
        self.events.push_back(SignalEvent::PeerOnline);
        self.events.push_back(SignalEvent::RemoteCandidates {
            candidates: records,
            base_index: 0,
            fin: true,
            // First accepted offer clears any prior remote state.
            reset: true,
        });

        // Exactly one answer per accepted offer.
        blob.answer = Some(self.sealed_local()?);
        self.store.store(&blob)
    }

    pub fn poll_event(&mut self) -> Option<SignalEvent> {
        self.events.pop_front()
    }

    pub fn close(&mut self) {
        self.state = SignalState::Closed;
    }
}
