use std::cell::Cell;
use std::rc::Rc;

use crate::ports::clock::Clock;

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle and give another to the session.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Rc<Cell<u64>>,
    unix: Rc<Cell<u64>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(unix_seconds: u64) -> Self {
        Self { ms: Rc::new(Cell::new(0)), unix: Rc::new(Cell::new(unix_seconds)) }
    }

    /// Advance both the monotonic tick and the wall clock.
    pub fn advance_ms(&self, ms: u64) {
        self.ms.set(self.ms.get() + ms);
        self.unix.set(self.unix.get() + ms / 1000);
    }

    /// Jump the wall clock without touching the monotonic tick.
    pub fn set_unix(&self, unix_seconds: u64) {
        self.unix.set(unix_seconds);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.ms.get()
    }

    fn unix_seconds(&self) -> u64 {
        self.unix.get()
    }
}
