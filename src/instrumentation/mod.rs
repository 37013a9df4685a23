//! C10 — Stats & Report: periodic snapshot-and-reset of the counter groups
//! into a status record, published to a single-slot mailbox consumed by C4.

pub mod stats;

use std::sync::Mutex;

pub use stats::{DownstreamStats, UpstreamStats};

use crate::protocol::Stat;

/// GPS position used in the status record: either a real fix or the
/// configured reference coordinates when `fake_gps` is set (§4.9).
#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: i32,
}

/// Single-slot mailbox: C10 overwrites it every `stat_interval`; C4 takes
/// the latest value (if any) on its next PUSH_DATA cycle.
#[derive(Default)]
pub struct StatusMailbox {
    slot: Mutex<Option<Stat>>,
}

impl StatusMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, stat: Stat) {
        *self.slot.lock().expect("status mailbox lock poisoned") = Some(stat);
    }

    /// Take the pending status report, if any, clearing the slot.
    pub fn take(&self) -> Option<Stat> {
        self.slot.lock().expect("status mailbox lock poisoned").take()
    }
}

fn ack_ratio(sent: u64, acked: u64) -> f32 {
    if sent == 0 {
        100.0
    } else {
        100.0 * acked as f32 / sent as f32
    }
}

/// Compose the §4.9 status record from a snapshot-and-reset of both counter
/// groups, the current GPS position, and board temperature.
pub fn compose_report(upstream: &UpstreamStats, downstream: &DownstreamStats, position: Position, temperature_c: f32, now_utc: &str) -> Stat {
    let up = upstream.snapshot();
    upstream.reset_interval();
    let down = downstream.snapshot();
    downstream.reset_interval();

    Stat {
        time: now_utc.to_string(),
        lati: position.lat,
        long: position.lon,
        alti: position.alt_m,
        rxnb: up.rx_received,
        rxok: up.rx_crc_ok,
        rxfw: up.rx_forwarded,
        ackr: ack_ratio(up.dgram_sent, up.ack_received),
        dwnb: down.pull_acked,
        txnb: down.tx_emitted,
        temp: temperature_c,
    }
}
