
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

use proto::{Body, Packet, MAX_DATA_PAYLOAD};

use crate::error::{Error, Result};
use crate::rto::{RtoEstimator, RTO_MAX_MS};
use crate::stats::TransportStats;

/// Default number of outstanding unacknowledged datagrams.
pub const DEFAULT_WINDOW: usize = 32;

/// Default per-packet retransmission bound.
pub const DEFAULT_MAX_RETRANS: u32 = 10;

/// Wrap-aware signed difference between two 16-bit sequences.
///
/// Positive when `a` is ahead of `b` on the ring.
#[inline]
pub fn seq_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

#[derive(Debug)]
struct SendEntry {
    payload: Bytes,
    seq: u16,
    send_time: Instant,
    retx_count: u32,
    acked: bool,
}

/// Fixed-window ARQ over framed datagrams.
///
/// The send window holds at most `window` in-flight packets indexed by
/// `seq % window`; `submit` refuses to overcommit. The receive side
/// stores out-of-order arrivals in the mirrored window and releases
/// them in sequence through `recv`. Every received DATA queues an ACK
/// carrying the cumulative point (`recv_base`) and a selective bitmap
/// of the slots held beyond it.
pub struct ReliableTransport {
    window: usize,
    max_retrans: u32,

    send_seq: u16,
    send_base: u16,
    send_slots: Vec<Option<SendEntry>>,

    recv_base: u16,
    recv_slots: Vec<Option<Bytes>>,

    rto: RtoEstimator,
    transmits: VecDeque<Packet>,
    stats: TransportStats,
    failed: bool,
}

impl Default for ReliableTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableTransport {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW, DEFAULT_MAX_RETRANS)
    }

    pub fn with_window(window: usize, max_retrans: u32) -> Self {
        debug_assert!(window > 0 && window <= 32);
        ReliableTransport {
            window,
            max_retrans,
            send_seq: 0,
            send_base: 0,
            send_slots: (0..window).map(|_| None).collect(),
            recv_base: 0,
            recv_slots: (0..window).map(|_| None).collect(),
            rto: RtoEstimator::new(),
            transmits: VecDeque::new(),
            stats: TransportStats::default(),
            failed: false,
        }
    }

    /// Number of packets submitted but not yet cumulatively acknowledged.
    pub fn in_flight(&self) -> usize {
        seq_diff(self.send_seq, self.send_base) as usize
    }

    pub fn window_available(&self) -> bool {
        self.in_flight() < self.window
    }

    /// True once some packet exhausted its retransmissions.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Current retransmission timeout in msec.
    pub fn rto(&self) -> u64 {
        self.rto.rto()
    }

    /// Smoothed RTT in msec; `None` before the first sample.
    pub fn srtt(&self) -> Option<u64> {
        self.rto.srtt()
    }

    /// Queues one datagram of application bytes.
    ///
    /// Returns the number of bytes accepted: the full payload, or 0
    /// when the window is full (the caller surfaces this as a partial
    /// write). Payloads above the datagram bound are an error.
    pub fn submit(&mut self, payload: &[u8], now: Instant) -> Result<usize> {
        if self.failed {
            return Err(Error::ErrConnectionLost);
        }
        if payload.len() > MAX_DATA_PAYLOAD {
            return Err(Error::ErrPayloadTooLarge);
        }
        if !self.window_available() {
            return Ok(0);
        }

        let seq = self.send_seq;
        let payload = Bytes::copy_from_slice(payload);
        let idx = seq as usize % self.window;
        debug_assert!(self.send_slots[idx].is_none());
        self.send_slots[idx] = Some(SendEntry {
            payload: payload.clone(),
            seq,
            send_time: now,
            retx_count: 0,
            acked: false,
        });
        self.send_seq = self.send_seq.wrapping_add(1);

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;
        self.transmits
            .push_back(Packet::with_seq(Body::Data(payload.clone()), seq));
        Ok(payload.len())
    }

    /// Processes a received ACK.
    pub fn on_ack(&mut self, ack_seq: u16, sack_bits: u32, now: Instant) {
        // An ack point beyond anything we sent is garbage.
        if seq_diff(ack_seq, self.send_seq) > 0 {
            return;
        }

        // Cumulative: everything strictly below the ack point.
        while seq_diff(ack_seq, self.send_base) > 0 {
            let idx = self.send_base as usize % self.window;
            if let Some(entry) = self.send_slots[idx].take() {
                if !entry.acked {
                    self.record_ack(entry.retx_count, entry.send_time, now);
                }
            }
            self.send_base = self.send_base.wrapping_add(1);
        }

        // Selective: bit i acknowledges ack_seq + i.
        for i in 0..32u16 {
            if sack_bits & (1 << i) == 0 {
                continue;
            }
            let seq = ack_seq.wrapping_add(i);
            if seq_diff(seq, self.send_base) < 0 || seq_diff(self.send_seq, seq) <= 0 {
                continue;
            }
            let idx = seq as usize % self.window;
            let mut sample = None;
            if let Some(entry) = &mut self.send_slots[idx] {
                if entry.seq == seq && !entry.acked {
                    entry.acked = true;
                    sample = Some((entry.retx_count, entry.send_time));
                }
            }
            if let Some((retx_count, send_time)) = sample {
                self.record_ack(retx_count, send_time, now);
            }
        }
    }

    fn record_ack(&mut self, retx_count: u32, send_time: Instant, now: Instant) {
        self.stats.packets_acked += 1;
        // Karn: only original transmissions produce RTT samples.
        if retx_count == 0 {
            let rtt = now.saturating_duration_since(send_time);
            self.rto.observe(rtt.as_millis() as u64);
        }
    }

    /// Stores a received DATA datagram and queues the matching ACK.
    ///
    /// Returns whether the datum was new (not a duplicate and inside
    /// the receive window).
    pub fn on_data(&mut self, seq: u16, payload: Bytes) -> bool {
        let d = seq_diff(seq, self.recv_base);
        let is_new = if d < 0 || d >= self.window as i32 {
            self.stats.out_of_window += 1;
            false
        } else {
            let idx = seq as usize % self.window;
            if self.recv_slots[idx].is_some() {
                self.stats.duplicates += 1;
                false
            } else {
                self.stats.packets_received += 1;
                self.stats.bytes_received += payload.len() as u64;
                self.recv_slots[idx] = Some(payload);
                true
            }
        };

        self.queue_ack();
        is_new
    }

    fn queue_ack(&mut self) {
        let ack_seq = self.recv_base;
        let mut sack_bits = 0u32;
        for i in 0..self.window.min(32) {
            let seq = ack_seq.wrapping_add(i as u16);
            if self.recv_slots[seq as usize % self.window].is_some() {
                sack_bits |= 1 << i;
            }
        }
        self.transmits
            .push_back(Packet::new(Body::Ack { ack_seq, sack_bits }));
    }

    /// Pops the next in-order payload, if present.
    pub fn recv(&mut self) -> Option<Bytes> {
        let idx = self.recv_base as usize % self.window;
        let payload = self.recv_slots[idx].take()?;
        self.recv_base = self.recv_base.wrapping_add(1);
        Some(payload)
    }

    /// True while any payload is deliverable without waiting.
    pub fn has_pending_recv(&self) -> bool {
        self.recv_slots[self.recv_base as usize % self.window].is_some()
    }

    /// Drives retransmission. Packets whose timeout elapsed are queued
    /// again; a packet that exhausts `max_retrans` kills the transport.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.failed {
            return Err(Error::ErrConnectionLost);
        }

        let rto = self.rto.rto();
        let mut lost = false;
        for slot in self.send_slots.iter_mut() {
            let Some(entry) = slot else { continue };
            if entry.acked {
                continue;
            }
            // Timeout scales with the retransmit count on persistent
            // loss, bounded by the RTO ceiling.
            let wait = (rto * (entry.retx_count as u64 + 1)).min(RTO_MAX_MS);
            if now.saturating_duration_since(entry.send_time) < Duration::from_millis(wait) {
                continue;
            }
            if entry.retx_count >= self.max_retrans {
                lost = true;
                break;
            }
            entry.retx_count += 1;
            entry.send_time = now;
            self.stats.packets_retransmitted += 1;
            log::trace!("retransmit seq={} retx={}", entry.seq, entry.retx_count);
            self.transmits
                .push_back(Packet::with_seq(Body::Data(entry.payload.clone()), entry.seq));
        }

        if lost {
            self.failed = true;
            return Err(Error::ErrConnectionLost);
        }
        Ok(())
    }

    /// Next outbound packet, if any.
    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<Packet> {
        self.transmits.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn with_initial_seqs(mut self, send: u16, recv: u16) -> Self {
        self.send_seq = send;
        self.send_base = send;
        self.recv_base = recv;
        self
    }
}
