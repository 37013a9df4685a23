//! Rate-limited logging helpers.
//!
//! The GPS reader and downstream loops can generate the same warning on
//! every iteration (stale fix, repeated TX rejection); `LogThrottle` caps how
//! often a given category actually reaches the log.

use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    count: u32,
    t0: Instant,
}

impl LogThrottle {
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self { window_ms, cap, count: 0, t0: Instant::now() }
    }

    /// Returns `true` if the message should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.t0).as_millis() as u64 > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.cap
    }

    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
    }
}

/// Per-category throttles, so the GPS loop's warnings don't starve the
/// downstream loop's.
#[derive(Debug, Default)]
pub struct ThrottleManager {
    throttles: HashMap<String, LogThrottle>,
}

impl ThrottleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, category: &str, window_ms: u64, cap: u32) -> bool {
        self.throttles
            .entry(category.to_string())
            .or_insert_with(|| LogThrottle::new(window_ms, cap))
            .allow()
    }

    pub fn reset_all(&mut self) {
        for throttle in self.throttles.values_mut() {
            throttle.reset();
        }
    }
}

/// Times one operation and logs its duration at `Debug` on drop-free finish.
#[derive(Debug)]
pub struct PerfTimer {
    start: Instant,
    operation: String,
}

impl PerfTimer {
    pub fn start(operation: &str) -> Self {
        Self { start: Instant::now(), operation: operation.to_string() }
    }

    pub fn finish(self) {
        log::debug!("{} took {:?}", self.operation, self.start.elapsed());
    }

    pub fn finish_with_level(self, level: log::Level) {
        log::log!(level, "{} took {:?}", self.operation, self.start.elapsed());
    }
}
