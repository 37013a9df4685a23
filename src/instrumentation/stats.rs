//! C10 — upstream/downstream counter groups, guarded by independent mutexes
//! per `spec.md` §3/§5, with snapshot-and-reset semantics for interval
//! counters and `AtomicU64` "ever-since-start" counters that are not reset
//! (see `DESIGN.md`'s Open Question decision).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct UpstreamSnapshot {
    pub rx_received: u64,
    pub rx_crc_ok: u64,
    pub rx_forwarded: u64,
    pub dgram_sent: u64,
    pub ack_received: u64,
}

/// Upstream (C4) counters: written by C4, read by C10.
#[derive(Default)]
pub struct UpstreamStats {
    rx_received: AtomicU64,
    rx_crc_ok: AtomicU64,
    rx_forwarded: AtomicU64,
    dgram_sent: AtomicU64,
    ack_received: AtomicU64,
    last_token_sent: Mutex<Option<u16>>,
}

impl UpstreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// `crc_ok` tracks the original STAT's `rxok` (CRC-valid receptions);
    /// `forwarded` tracks `rxfw` (receptions actually sent upstream under
    /// the configured `forward_crc_*` policy) — the two diverge whenever a
    /// CRC-error or CRC-disabled packet is forwarded anyway.
    pub fn record_rx(&self, crc_ok: bool, forwarded: bool) {
        self.rx_received.fetch_add(1, Ordering::Relaxed);
        if crc_ok {
            self.rx_crc_ok.fetch_add(1, Ordering::Relaxed);
        }
        if forwarded {
            self.rx_forwarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dgram_sent(&self, token: u16) {
        self.dgram_sent.fetch_add(1, Ordering::Relaxed);
        *self.last_token_sent.lock().expect("upstream stats lock poisoned") = Some(token);
    }

    /// Testable Property 5: only a PUSH_ACK whose token matches the last
    /// datagram sent increments the ack counter.
    pub fn record_ack(&self, token: u16) -> bool {
        let last = *self.last_token_sent.lock().expect("upstream stats lock poisoned");
        if last == Some(token) {
            self.ack_received.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        UpstreamSnapshot {
            rx_received: self.rx_received.load(Ordering::Relaxed),
            rx_crc_ok: self.rx_crc_ok.load(Ordering::Relaxed),
            rx_forwarded: self.rx_forwarded.load(Ordering::Relaxed),
            dgram_sent: self.dgram_sent.load(Ordering::Relaxed),
            ack_received: self.ack_received.load(Ordering::Relaxed),
        }
    }

    /// Reset the interval counters (called once per stat tick); the
    /// last-sent token is left untouched since it's not a reporting counter.
    pub fn reset_interval(&self) {
        self.rx_received.store(0, Ordering::Relaxed);
        self.rx_crc_ok.store(0, Ordering::Relaxed);
        self.rx_forwarded.store(0, Ordering::Relaxed);
        self.dgram_sent.store(0, Ordering::Relaxed);
        self.ack_received.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct DownstreamSnapshot {
    pub pull_sent: u64,
    pub pull_acked: u64,
    pub tx_requested_total: u64,
    pub tx_accepted: u64,
    pub tx_rejected: u64,
    pub tx_emitted: u64,
    pub tx_failed: u64,
    pub beacons_sent: u64,
}

/// Downstream (C5/C6/C7) counters.
#[derive(Default)]
pub struct DownstreamStats {
    pull_sent: AtomicU64,
    pull_acked: AtomicU64,
    /// "Ever-since-start" per the spec's Open Question decision: never
    /// reset by `reset_interval`.
    tx_requested_total: AtomicU64,
    tx_accepted: AtomicU64,
    tx_rejected: AtomicU64,
    tx_emitted: AtomicU64,
    tx_failed: AtomicU64,
    beacons_sent: AtomicU64,
    consecutive_unacked_pulls: AtomicU64,
}

impl DownstreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pull_sent(&self) {
        self.pull_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pull_acked(&self) {
        self.pull_acked.fetch_add(1, Ordering::Relaxed);
        self.consecutive_unacked_pulls.store(0, Ordering::Relaxed);
    }

    /// Returns the updated streak, for the auto-quit check against
    /// `autoquit_threshold`.
    pub fn record_pull_unacked(&self) -> u64 {
        self.consecutive_unacked_pulls.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_tx_requested(&self) {
        self.tx_requested_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_accepted(&self) {
        self.tx_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_rejected(&self) {
        self.tx_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_emitted(&self, is_beacon: bool) {
        self.tx_emitted.fetch_add(1, Ordering::Relaxed);
        if is_beacon {
            self.beacons_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tx_failed(&self) {
        self.tx_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DownstreamSnapshot {
        DownstreamSnapshot {
            pull_sent: self.pull_sent.load(Ordering::Relaxed),
            pull_acked: self.pull_acked.load(Ordering::Relaxed),
            tx_requested_total: self.tx_requested_total.load(Ordering::Relaxed),
            tx_accepted: self.tx_accepted.load(Ordering::Relaxed),
            tx_rejected: self.tx_rejected.load(Ordering::Relaxed),
            tx_emitted: self.tx_emitted.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
            beacons_sent: self.beacons_sent.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter except `tx_requested_total`, the one
    /// ever-since-start counter in this group.
    pub fn reset_interval(&self) {
        self.pull_sent.store(0, Ordering::Relaxed);
        self.pull_acked.store(0, Ordering::Relaxed);
        self.tx_accepted.store(0, Ordering::Relaxed);
        self.tx_rejected.store(0, Ordering::Relaxed);
        self.tx_emitted.store(0, Ordering::Relaxed);
        self.tx_failed.store(0, Ordering::Relaxed);
        self.beacons_sent.store(0, Ordering::Relaxed);
    }
}
