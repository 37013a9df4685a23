//! C2 — XTAL Tracker and OS-clock discipline.
//!
//! Low-pass-filtered estimator of crystal drift (§4.7). Runs as a 1 Hz task
//! reading the time reference; publishes a scalar correction factor consumed
//! by the JIT dispatcher (beacon frequency) and the beacon generator
//! (GPS→counter mapping).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::constants::{OS_CLOCK_DISCIPLINE_EPOCH_UNIX, OS_CLOCK_DISCIPLINE_THRESHOLD_S, VALIDATOR_INTERVAL, XERR_FILT_COEF, XERR_INIT_AVG};
use crate::error::ForwarderError;
use crate::signal::Shutdown;
use crate::time_ref::{TimeReference, TimeSpec};

struct XtalState {
    correct: f64,
    locked: bool,
    init_count: u32,
    init_acc: f64,
}

impl Default for XtalState {
    fn default() -> Self {
        XtalState {
            correct: 1.0,
            locked: false,
            init_count: 0,
            init_acc: 0.0,
        }
    }
}

/// Shared XTAL correction tracker (C2).
pub struct XtalTracker {
    state: Mutex<XtalState>,
}

impl Default for XtalTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl XtalTracker {
    pub fn new() -> Self {
        XtalTracker {
            state: Mutex::new(XtalState::default()),
        }
    }

    /// Current correction factor. `1.0` whenever the tracker is not locked.
    pub fn correction(&self) -> f64 {
        self.state.lock().expect("xtal lock poisoned").correct
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().expect("xtal lock poisoned").locked
    }

    /// Feed one per-PPS `xtal_err` sample, or `None` if the time reference is
    /// stale/absent (in which case the tracker resets to unlocked, correction
    /// 1.0, per §4.7 step 1).
    pub fn tick(&self, xtal_err_sample: Option<f64>) {
        let mut s = self.state.lock().expect("xtal lock poisoned");
        let Some(x) = xtal_err_sample else {
            *s = XtalState::default();
            return;
        };

        if s.init_count < XERR_INIT_AVG {
            s.init_acc += x;
            s.init_count += 1;
            if s.init_count == XERR_INIT_AVG {
                s.correct = XERR_INIT_AVG as f64 / s.init_acc;
                s.locked = true;
            }
        } else {
            s.correct = s.correct - s.correct / XERR_FILT_COEF + (1.0 / x) / XERR_FILT_COEF;
        }
    }
}

/// Sixth logical thread (§5): every `VALIDATOR_INTERVAL`, checks the time
/// reference's age and invalidates it plus resets the XTAL correction to
/// 1.0 once it goes stale, so beacon generation pauses on GPS loss rather
/// than keep extrapolating off a frozen PPS.
pub async fn run_validator(time_ref: Arc<TimeReference>, xtal: Arc<XtalTracker>, shutdown: &Shutdown) -> Result<(), ForwarderError> {
    while !shutdown.should_stop() {
        tokio::time::sleep(VALIDATOR_INTERVAL).await;
        validate_once(&time_ref, &xtal);
    }
    Ok(())
}

/// One validation pass, split out from [`run_validator`] so the decision is
/// testable without waiting on `VALIDATOR_INTERVAL`.
fn validate_once(time_ref: &TimeReference, xtal: &XtalTracker) {
    let stale = match time_ref.snapshot() {
        Some(snapshot) => !snapshot.is_valid(),
        None => false,
    };
    if stale {
        time_ref.invalidate();
        xtal.tick(None);
    }
}

/// One-shot OS-clock discipline: steps the system clock to GPS time exactly
/// once per process lifetime, iff the GPS date is plausible (post
/// 2020-03-05T18:00:00Z) and the offset from system time exceeds 10s.
///
/// `set_clock` is injected so tests can observe the decision without the
/// process actually needing CAP_SYS_TIME; the production wiring passes a
/// closure that calls into the platform clock-set syscall.
pub struct OsClockDiscipline {
    already_set: AtomicBool,
}

impl Default for OsClockDiscipline {
    fn default() -> Self {
        Self::new()
    }
}

impl OsClockDiscipline {
    pub fn new() -> Self {
        OsClockDiscipline {
            already_set: AtomicBool::new(false),
        }
    }

    /// Returns `true` if this call actually stepped the clock.
    pub fn maybe_discipline(
        &self,
        gps: TimeSpec,
        system_now_unix: i64,
        set_clock: impl FnOnce(TimeSpec),
    ) -> bool {
        if self.already_set.load(Ordering::SeqCst) {
            return false;
        }
        if gps.sec < OS_CLOCK_DISCIPLINE_EPOCH_UNIX {
            return false;
        }
        if (gps.sec - system_now_unix).abs() < OS_CLOCK_DISCIPLINE_THRESHOLD_S {
            return false;
        }
        if self
            .already_set
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        set_clock(gps);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterUs;

    #[test]
    fn init_average_locks_after_16_samples() {
        let tracker = XtalTracker::new();
        for _ in 0..15 {
            tracker.tick(Some(1.0));
            assert!(!tracker.is_locked());
        }
        tracker.tick(Some(1.0));
        assert!(tracker.is_locked());
        assert!((tracker.correction() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stale_reference_resets_tracker() {
        let tracker = XtalTracker::new();
        for _ in 0..16 {
            tracker.tick(Some(1.0));
        }
        assert!(tracker.is_locked());
        tracker.tick(None);
        assert!(!tracker.is_locked());
        assert_eq!(tracker.correction(), 1.0);
    }

    #[test]
    fn correction_stays_bounded_for_small_drift() {
        let tracker = XtalTracker::new();
        let mut x = 1.0 + 1e-4;
        for i in 0..5000 {
            tracker.tick(Some(x));
            x = if i % 2 == 0 { 1.0 + 1e-4 } else { 1.0 - 1e-4 };
        }
        assert!((tracker.correction() - 1.0).abs() <= 1e-3);
    }

    #[test]
    fn os_clock_discipline_idempotent() {
        let disc = OsClockDiscipline::new();
        let gps = TimeSpec::new(OS_CLOCK_DISCIPLINE_EPOCH_UNIX + 1000, 0);
        let mut calls = 0;
        assert!(disc.maybe_discipline(gps, gps.sec - 100, |_| calls += 1));
        assert_eq!(calls, 1);
        assert!(!disc.maybe_discipline(gps, gps.sec - 100, |_| calls += 1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn validator_leaves_fresh_reference_untouched() {
        let tref = TimeReference::new();
        tref.update(CounterUs(1000), TimeSpec::new(1_700_000_000, 0), TimeSpec::new(1_400_000_000, 0), 1.0);
        let tracker = XtalTracker::new();
        for _ in 0..16 {
            tracker.tick(Some(1.0));
        }
        validate_once(&tref, &tracker);
        assert!(tref.is_valid());
        assert!(tracker.is_locked());
    }

    #[test]
    fn validator_invalidates_stale_reference_and_resets_xtal() {
        let tref = TimeReference::new();
        tref.update(CounterUs(1000), TimeSpec::new(1_700_000_000, 0), TimeSpec::new(1_400_000_000, 0), 1.0);
        tref.backdate_for_test(crate::constants::GPS_REF_MAX_AGE + std::time::Duration::from_secs(1));
        let tracker = XtalTracker::new();
        for _ in 0..16 {
            tracker.tick(Some(1.0));
        }
        assert!(tracker.is_locked());

        validate_once(&tref, &tracker);
        assert!(!tref.is_valid());
        assert!(!tracker.is_locked());
        assert_eq!(tracker.correction(), 1.0);
    }

    #[test]
    fn os_clock_discipline_skips_small_offsets_and_old_dates() {
        let disc = OsClockDiscipline::new();
        let gps = TimeSpec::new(OS_CLOCK_DISCIPLINE_EPOCH_UNIX + 1000, 0);
        assert!(!disc.maybe_discipline(gps, gps.sec - 1, |_| panic!("should not set")));
        let old_gps = TimeSpec::new(OS_CLOCK_DISCIPLINE_EPOCH_UNIX - 1000, 0);
        assert!(!disc.maybe_discipline(old_gps, old_gps.sec - 100, |_| panic!("should not set")));
    }
}
