/// Monotonic last-event timestamp plus a period.
///
/// Used for the sampling cadence, the manual-button settle window and the
/// persistence quiescence window. A disarmed timer has no last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTimer {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl DebounceTimer {
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.last_ms.is_some()
    }

    /// Records an event at `now_ms`, restarting the window.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }

    pub fn disarm(&mut self) {
        self.last_ms = None;
    }

    /// True once an armed timer has been silent for a full period.
    pub fn has_elapsed(&self, now_ms: u64) -> bool {
        self.last_ms
            .map(|last| now_ms.saturating_sub(last) >= self.period_ms)
            .unwrap_or(false)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        match self.last_ms {
            Some(last) => self.period_ms.saturating_sub(now_ms.saturating_sub(last)),
            None => 0,
        }
    }

    /// Cadence helper: fires on the first call and then at most once per
    /// period, restarting the window every time it fires.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.is_armed() && !self.has_elapsed(now_ms) {
            return false;
        }
        self.reset(now_ms);
        true
    }
}
