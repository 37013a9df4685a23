//! Two-flag cooperative shutdown (`spec.md` §5): `exit_sig` requests a
//! graceful drain-and-close, `quit_sig` requests immediate termination. Every
//! task checks both at the head of its loop.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct Shutdown {
    exit: AtomicBool,
    quit: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_graceful(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn request_immediate(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.exit.store(true, Ordering::SeqCst);
    }

    /// True once either signal has been raised; loops should check this at
    /// the head of every iteration.
    pub fn should_stop(&self) -> bool {
        self.exit.load(Ordering::SeqCst) || self.quit.load(Ordering::SeqCst)
    }

    /// True only for `quit_sig`: callers that would otherwise drain state
    /// (flush a send, finish a read) should skip that and return at once.
    pub fn is_immediate(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}
