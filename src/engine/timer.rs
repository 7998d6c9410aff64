//! Engine clock.
//!
//! The platform owns the only timer. The engine keeps its own millisecond
//! clock, advanced by the programmed duration when the timer fires and by
//! the reported elapsed time when it is cancelled early.

/// Millisecond clock driven by the platform timer.
#[derive(Debug, Default)]
pub struct EngineClock {
    now_ms: u64,
    /// Duration of the currently programmed timer.
    armed: Option<u32>,
}

impl EngineClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.now_ms
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn armed(&self) -> Option<u32> {
        self.armed
    }

    /// Record that the platform timer was programmed for `ms`.
    pub fn arm(&mut self, ms: u32) {
        self.armed = Some(ms);
    }

    /// The programmed timer expired.
    ///
    /// Returns false if nothing was armed; such a tick is stale.
    pub fn fire(&mut self) -> bool {
        match self.armed.take() {
            Some(ms) => {
                self.now_ms += u64::from(ms);
                true
            }
            None => false,
        }
    }

    /// The programmed timer was cancelled after `elapsed_ms`.
    ///
    /// Elapsed time beyond the programmed duration is ignored.
    pub fn cancel(&mut self, elapsed_ms: u32) {
        if let Some(ms) = self.armed.take() {
            self.now_ms += u64::from(elapsed_ms.min(ms));
        }
    }
}
