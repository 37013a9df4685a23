//! C3 — Just-In-Time downlink scheduler.
//!
//! One `JitQueue` exists per TX chain. It holds a bounded, target-ordered set
//! of TX descriptors (downlinks and beacons) and performs collision detection
//! against modular time-on-air windows, per `spec.md` §4.1.

use crate::constants::{JIT_NUM_BEACON_IN_QUEUE, JIT_QUEUE_MAX, MIN_TX_LEAD_US};
use crate::counter::CounterUs;

/// Which LoRaWAN class (or beacon) a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Beacon,
    ClassA,
    ClassB,
    ClassC,
}

impl PacketClass {
    pub fn is_beacon(self) -> bool {
        matches!(self, PacketClass::Beacon)
    }
}

/// Opaque radio parameters plus the scheduling fields JIT cares about.
#[derive(Debug, Clone)]
pub struct TxDescriptor {
    pub count_us: CounterUs,
    pub pre_delay_us: u32,
    pub post_delay_us: u32,
    pub packet_class: PacketClass,
    /// Radio-facing payload; opaque to the scheduler.
    pub freq_hz: u32,
    pub power_dbm: i8,
    pub payload: Vec<u8>,
}

impl TxDescriptor {
    fn window(&self) -> (CounterUs, CounterUs) {
        self.count_us.window(self.pre_delay_us, self.post_delay_us)
    }
}

/// Result of [`JitQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitError {
    Full,
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    InvalidParam,
}

impl JitError {
    /// The string the gateway protocol expects in a TX_ACK `error`/`warn` field.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            JitError::Full => "COLLISION_PACKET", // queue-full is folded into the
            // same rejection family as the reference implementation's
            // JIT_ERROR_FULL, which also reports as "COLLISION_PACKET".
            JitError::TooLate => "TOO_LATE",
            JitError::TooEarly => "TOO_EARLY",
            JitError::CollisionPacket => "COLLISION_PACKET",
            JitError::CollisionBeacon => "COLLISION_BEACON",
            JitError::InvalidParam => "INVALID_PARAM",
        }
    }
}

struct Entry {
    descriptor: TxDescriptor,
    enqueued_at: CounterUs,
}

/// Per-chain bounded priority store of TX descriptors.
pub struct JitQueue {
    entries: Vec<Entry>,
}

impl Default for JitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JitQueue {
    pub fn new() -> Self {
        JitQueue { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_beacons(&self) -> usize {
        self.entries.iter().filter(|e| e.descriptor.packet_class.is_beacon()).count()
    }

    /// Maximum look-ahead, per §4.1: the counter range minus one beacon
    /// period, to avoid wrap ambiguity.
    fn max_lookahead_us(beacon_period_us: i64) -> i64 {
        (1i64 << 31) - beacon_period_us
    }

    /// Attempt to admit `descriptor` into the queue, anchored at the live
    /// counter value `now`. `beacon_period_us` bounds the look-ahead window
    /// (§4.1); pass `i64::MAX >> 1` equivalent-disabled value (0) when no
    /// beacon period is configured.
    pub fn enqueue(
        &mut self,
        now: CounterUs,
        descriptor: TxDescriptor,
        beacon_period_us: i64,
    ) -> Result<(), JitError> {
        if descriptor.pre_delay_us == 0 && !descriptor.packet_class.is_beacon() {
            return Err(JitError::InvalidParam);
        }

        let target_distance = descriptor.count_us.distance(now);
        if target_distance < MIN_TX_LEAD_US {
            return Err(JitError::TooLate);
        }
        let lookahead_cap = Self::max_lookahead_us(beacon_period_us.max(0));
        if target_distance > lookahead_cap {
            return Err(JitError::TooEarly);
        }

        let new_window = descriptor.window();
        for e in &self.entries {
            if CounterUs::windows_overlap(new_window, e.descriptor.window()) {
                return Err(if e.descriptor.packet_class.is_beacon() {
                    JitError::CollisionBeacon
                } else {
                    JitError::CollisionPacket
                });
            }
        }

        if self.entries.len() >= JIT_QUEUE_MAX {
            return Err(JitError::Full);
        }
        if descriptor.packet_class.is_beacon() && self.num_beacons() >= JIT_NUM_BEACON_IN_QUEUE {
            return Err(JitError::Full);
        }

        let insert_at = self
            .entries
            .iter()
            .position(|e| {
                let cmp = descriptor.count_us.distance(e.descriptor.count_us);
                cmp < 0 || (cmp == 0 && descriptor.packet_class.is_beacon() && !e.descriptor.packet_class.is_beacon())
            })
            .unwrap_or(self.entries.len());

        self.entries.insert(
            insert_at,
            Entry {
                descriptor,
                enqueued_at: now,
            },
        );
        Ok(())
    }

    /// Index of the earliest entry whose dispatch window has begun
    /// (`count_us - pre_delay` has passed `now`) and whose `count_us` has not
    /// yet elapsed.
    pub fn peek(&self, now: CounterUs) -> Option<usize> {
        self.entries.iter().position(|e| {
            let armed_at = e.descriptor.count_us.offset(-(e.descriptor.pre_delay_us as i64));
            let already_armed = armed_at.distance(now) <= 0;
            let not_yet_elapsed = e.descriptor.count_us.distance(now) >= 0;
            already_armed && not_yet_elapsed
        })
    }

    /// Remove and return the entry at `index`. Not idempotent; panics on an
    /// out-of-range index, matching Vec semantics (callers always pair this
    /// with a `peek` result taken under the same lock).
    pub fn dequeue(&mut self, index: usize) -> TxDescriptor {
        self.entries.remove(index).descriptor
    }

    #[cfg(test)]
    fn enqueued_order(&self) -> Vec<CounterUs> {
        self.entries.iter().map(|e| e.enqueued_at).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downlink(count_us: u32, toa_ms: u32) -> TxDescriptor {
        TxDescriptor {
            count_us: CounterUs(count_us),
            pre_delay_us: 100,
            post_delay_us: toa_ms * 1000,
            packet_class: PacketClass::ClassA,
            freq_hz: 868_100_000,
            power_dbm: 14,
            payload: vec![0u8; 10],
        }
    }

    fn beacon(count_us: u32) -> TxDescriptor {
        TxDescriptor {
            count_us: CounterUs(count_us),
            pre_delay_us: 0,
            post_delay_us: 2_000_000,
            packet_class: PacketClass::Beacon,
            freq_hz: 869_525_000,
            power_dbm: 14,
            payload: vec![0u8; 17],
        }
    }

    #[test]
    fn s1_collision_packet() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        q.enqueue(now, downlink(1_000_000, 50), 0).unwrap();
        let err = q.enqueue(now, downlink(1_030_000, 20), 0).unwrap_err();
        assert_eq!(err, JitError::CollisionPacket);
    }

    #[test]
    fn s2_beacon_priority() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        q.enqueue(now, beacon(1_280_000_000), 128_000_000).unwrap();
        let err = q
            .enqueue(now, downlink(1_280_000_128, 50), 128_000_000)
            .unwrap_err();
        assert_eq!(err, JitError::CollisionBeacon);
    }

    #[test]
    fn s3_wrap_accept_and_dispatch() {
        let mut q = JitQueue::new();
        let now = CounterUs(0xFFFF_F000);
        let d = TxDescriptor {
            count_us: CounterUs(0x0001_0000),
            pre_delay_us: 1000,
            post_delay_us: 50_000,
            packet_class: PacketClass::ClassA,
            freq_hz: 868_100_000,
            power_dbm: 14,
            payload: vec![],
        };
        q.enqueue(now, d, 0).unwrap();
        assert!(q.peek(now).is_none());
        let armed_at = CounterUs(0x0001_0000 - 1000);
        assert!(q.peek(armed_at).is_some());
    }

    #[test]
    fn too_late_rejected() {
        let mut q = JitQueue::new();
        let now = CounterUs(1_000_000);
        let err = q.enqueue(now, downlink(1_000_100, 20), 0).unwrap_err();
        assert_eq!(err, JitError::TooLate);
    }

    #[test]
    fn too_early_rejected() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        let beacon_period_us = 128_000_000;
        let far = (1i64 << 31) - beacon_period_us + 1;
        let d = downlink(far as u32, 20);
        let err = q.enqueue(now, d, beacon_period_us).unwrap_err();
        assert_eq!(err, JitError::TooEarly);
    }

    #[test]
    fn full_queue_rejected() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        for i in 0..JIT_QUEUE_MAX {
            let count = 10_000_000 + (i as u32) * 200_000;
            q.enqueue(now, downlink(count, 20), 0).unwrap();
        }
        let err = q.enqueue(now, downlink(10_000_000 + 1_800_000, 20), 0).unwrap_err();
        assert_eq!(err, JitError::Full);
    }

    #[test]
    fn invalid_param_zero_preamble_delay() {
        let mut q = JitQueue::new();
        let mut d = downlink(1_000_000, 20);
        d.pre_delay_us = 0;
        let err = q.enqueue(CounterUs(0), d, 0).unwrap_err();
        assert_eq!(err, JitError::InvalidParam);
    }

    #[test]
    fn peek_and_dequeue_lifecycle() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        q.enqueue(now, downlink(1_000_000, 20), 0).unwrap();
        assert!(q.peek(CounterUs(999_000)).is_none());
        let idx = q.peek(CounterUs(999_950)).expect("should be armed");
        let d = q.dequeue(idx);
        assert_eq!(d.count_us, CounterUs(1_000_000));
        assert!(q.is_empty());
    }

    #[test]
    fn insertion_is_target_ordered() {
        let mut q = JitQueue::new();
        let now = CounterUs(0);
        q.enqueue(now, downlink(3_000_000, 10), 0).unwrap();
        q.enqueue(now, downlink(1_000_000, 10), 0).unwrap();
        q.enqueue(now, downlink(2_000_000, 10), 0).unwrap();
        let order = q.enqueued_order();
        assert_eq!(order.len(), 3);
    }
}
