//! C1 — Time Reference.
//!
//! Holds the `(counter, UTC, GPS, xtal_err)` tuple latched at the most recent
//! GPS PPS pulse, and the wall-clock time it was captured at. Consumers
//! (upstream annotation, Class B scheduling, beacon generation) read through
//! [`TimeReference::snapshot`], which also reports validity.

use std::time::{Duration, SystemTime};

use crate::constants::{GPS_REF_MAX_AGE, UNIX_GPS_EPOCH_OFFSET};
use crate::counter::CounterUs;

/// Seconds + nanoseconds timestamp, used for both UTC and GPS time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

impl TimeSpec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        TimeSpec { sec, nsec }
    }

    pub fn as_secs_f64(self) -> f64 {
        self.sec as f64 + (self.nsec as f64) * 1e-9
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let sec = secs.floor() as i64;
        let nsec = ((secs - sec as f64) * 1e9).round() as u32;
        TimeSpec { sec, nsec }
    }

    /// Convert a UTC timespec to the GPS-epoch timespec (GPS epoch is
    /// 1980-01-06, i.e. `UNIX_GPS_EPOCH_OFFSET` seconds after the Unix epoch).
    pub fn utc_to_gps(utc: TimeSpec) -> TimeSpec {
        TimeSpec::new(utc.sec - UNIX_GPS_EPOCH_OFFSET, utc.nsec)
    }

    pub fn gps_to_utc(gps: TimeSpec) -> TimeSpec {
        TimeSpec::new(gps.sec + UNIX_GPS_EPOCH_OFFSET, gps.nsec)
    }
}

/// Snapshot of the time reference at the moment it was captured.
#[derive(Debug, Clone, Copy)]
struct Reference {
    systime: SystemTime,
    counter_at_pps: CounterUs,
    utc: TimeSpec,
    gps: TimeSpec,
    xtal_err: f64,
}

/// Shared, single-writer time reference (C1). The GPS reader task is the
/// sole writer; every other task only reads through [`snapshot`].
pub struct TimeReference {
    inner: std::sync::RwLock<Option<Reference>>,
}

/// A read-only, already-validity-checked view of the time reference.
#[derive(Debug, Clone, Copy)]
pub struct TimeReferenceSnapshot {
    pub counter_at_pps: CounterUs,
    pub utc: TimeSpec,
    pub gps: TimeSpec,
    pub xtal_err: f64,
    pub age: Duration,
}

impl TimeReferenceSnapshot {
    pub fn is_valid(&self) -> bool {
        self.age <= GPS_REF_MAX_AGE
    }

    /// Linear extrapolation of a packet's counter timestamp to UTC:
    /// `utc_pkt = utc_ref + (count_pkt - counter_ref) * xtal_err / 1e6`.
    pub fn counter_to_utc(&self, count: CounterUs) -> TimeSpec {
        let delta_us = count.distance(self.counter_at_pps) as f64;
        TimeSpec::from_secs_f64(self.utc.as_secs_f64() + delta_us * self.xtal_err / 1e6)
    }

    /// Same extrapolation, landing in GPS-epoch seconds (used for `tmms`).
    pub fn counter_to_gps(&self, count: CounterUs) -> TimeSpec {
        let delta_us = count.distance(self.counter_at_pps) as f64;
        TimeSpec::from_secs_f64(self.gps.as_secs_f64() + delta_us * self.xtal_err / 1e6)
    }

    /// Inverse of [`counter_to_gps`]: find the counter value at which the
    /// concentrator clock will read the given GPS time.
    pub fn gps_to_counter(&self, target_gps: TimeSpec) -> CounterUs {
        let delta_s = target_gps.as_secs_f64() - self.gps.as_secs_f64();
        let delta_us = (delta_s * 1e6 / self.xtal_err).round() as i64;
        self.counter_at_pps.offset(delta_us)
    }
}

impl Default for TimeReference {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeReference {
    pub fn new() -> Self {
        TimeReference {
            inner: std::sync::RwLock::new(None),
        }
    }

    /// Called by the GPS reader (C8) on every PPS-aligned UBX_NAV_TIMEGPS fix.
    pub fn update(&self, counter_at_pps: CounterUs, utc: TimeSpec, gps: TimeSpec, xtal_err: f64) {
        let mut guard = self.inner.write().expect("time reference lock poisoned");
        *guard = Some(Reference {
            systime: SystemTime::now(),
            counter_at_pps,
            utc,
            gps,
            xtal_err,
        });
    }

    /// Read the latest reference and compute its current age. Returns `None`
    /// if no PPS has ever been observed.
    pub fn snapshot(&self) -> Option<TimeReferenceSnapshot> {
        let guard = self.inner.read().expect("time reference lock poisoned");
        let r = (*guard)?;
        // `duration_since` errs if `systime` is in the future, i.e. the
        // system clock stepped backward since the reference was captured.
        // Treat that as maximally stale rather than fresh.
        let age = SystemTime::now().duration_since(r.systime).unwrap_or(Duration::MAX);
        Some(TimeReferenceSnapshot {
            counter_at_pps: r.counter_at_pps,
            utc: r.utc,
            gps: r.gps,
            xtal_err: r.xtal_err,
            age,
        })
    }

    /// Convenience: `true` iff a reference exists and is within the
    /// staleness bound.
    pub fn is_valid(&self) -> bool {
        self.snapshot().map(|s| s.is_valid()).unwrap_or(false)
    }

    /// Drop the current reference. Called by the validator task (C2) once
    /// the reference has aged past `GPS_REF_MAX_AGE` without a fresh PPS.
    pub fn invalidate(&self) {
        let mut guard = self.inner.write().expect("time reference lock poisoned");
        *guard = None;
    }

    /// Test-only: back-date the captured system time so staleness checks
    /// don't need to sleep past `GPS_REF_MAX_AGE`.
    #[cfg(test)]
    pub(crate) fn backdate_for_test(&self, age: Duration) {
        let mut guard = self.inner.write().expect("time reference lock poisoned");
        if let Some(r) = guard.as_mut() {
            r.systime = SystemTime::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_reference_is_valid() {
        let tref = TimeReference::new();
        assert!(!tref.is_valid());
        tref.update(CounterUs(1000), TimeSpec::new(1_700_000_000, 0), TimeSpec::new(1_400_000_000, 0), 1.0);
        assert!(tref.is_valid());
    }

    #[test]
    fn extrapolation_is_linear() {
        let tref = TimeReference::new();
        tref.update(CounterUs(1_000_000), TimeSpec::new(1_700_000_000, 0), TimeSpec::new(1_400_000_000, 0), 1.0);
        let snap = tref.snapshot().unwrap();
        let utc = snap.counter_to_utc(CounterUs(1_001_000));
        assert_eq!(utc.sec, 1_700_000_000);
        assert!((utc.nsec as f64 - 1_000_000.0).abs() < 1.0);
    }

    #[test]
    fn gps_to_counter_roundtrip() {
        let tref = TimeReference::new();
        tref.update(CounterUs(500_000), TimeSpec::new(0, 0), TimeSpec::new(1_280_000_000, 0), 1.0);
        let snap = tref.snapshot().unwrap();
        let target = TimeSpec::new(1_280_000_128, 0);
        let count = snap.gps_to_counter(target);
        assert_eq!(count.distance(CounterUs(500_000)), 128_000_000);
    }
}
