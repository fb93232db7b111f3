use crate::{
    config::ControlConfig,
    error::{Fault, StorageError},
    hal::SettingStore,
    storage::{PersistentSetting, UNINITIALIZED},
    timer::DebounceTimer,
    types::{Setpoint, SetpointEvent},
};

/// Result of [`SetpointController::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub setpoint: Setpoint,
    /// Faults met while loading; the controller already fell back around them.
    pub faults: Vec<Fault>,
}

/// Result of a due flush in [`SetpointController::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved(Setpoint),
    /// Value returned to what was already stored; nothing written.
    Unchanged(Setpoint),
    /// Write failed; the value stays dirty and is retried later.
    Failed(StorageError),
}

/// Owns the setpoint and decides when it reaches non-volatile storage.
///
/// Every change restarts a quiescence window; the value is written only once
/// the window passes without further changes. A power loss inside the window
/// keeps the previously flushed value.
#[derive(Debug)]
pub struct SetpointController<S> {
    setting: PersistentSetting<S>,
    current: Setpoint,
    persisted: Setpoint,
    min: i32,
    max: i32,
    quiescence_ms: u64,
    retry_ms: u64,
    deadline: DebounceTimer,
}

impl<S: SettingStore> SetpointController<S> {
    /// Reads the stored setpoint. An uninitialized or unreadable record is
    /// replaced by the default, which is written immediately; if that write
    /// fails it is retried from [`Self::tick`] like any other pending save.
    pub fn load(store: S, config: &ControlConfig) -> (Self, LoadOutcome) {
        let mut setting = PersistentSetting::new(store, config.setpoint_addr);
        let mut faults = Vec::new();

        let raw = match setting.load() {
            Ok(raw) => raw,
            Err(err) => {
                faults.push(Fault::Storage(err));
                UNINITIALIZED
            }
        };

        let mut deadline = DebounceTimer::new(config.persist_quiescence_ms);
        let (value, persisted) = if raw == UNINITIALIZED {
            let default = config.default_setpoint_c;
            match setting.save(default) {
                Ok(()) => {
                    faults.push(Fault::StorageUninitialized(default));
                    (default, default)
                }
                Err(err) => {
                    faults.push(Fault::Storage(err));
                    deadline = DebounceTimer::new(config.persist_retry_ms);
                    deadline.reset(0);
                    (default, UNINITIALIZED)
                }
            }
        } else {
            (raw.clamp(config.min_setpoint_c, config.max_setpoint_c), raw)
        };

        let setpoint = Setpoint::new(value);
        let controller = Self {
            setting,
            current: setpoint,
            persisted: Setpoint::new(persisted),
            min: config.min_setpoint_c,
            max: config.max_setpoint_c,
            quiescence_ms: config.persist_quiescence_ms,
            retry_ms: config.persist_retry_ms,
            deadline,
        };

        (controller, LoadOutcome { setpoint, faults })
    }

    pub fn current(&self) -> Setpoint {
        self.current
    }

    pub fn persisted(&self) -> Setpoint {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        self.deadline.is_armed()
    }

    pub fn save_due_in_ms(&self, now_ms: u64) -> Option<u64> {
        self.is_dirty().then(|| self.deadline.remaining_ms(now_ms))
    }

    pub fn apply(&mut self, event: SetpointEvent, now_ms: u64) -> bool {
        self.apply_events(&[event], now_ms)
    }

    /// Applies all events of one tick, clamping once at the end so opposing
    /// events cancel even at a bound. Returns true if the value changed.
    pub fn apply_events(&mut self, events: &[SetpointEvent], now_ms: u64) -> bool {
        if events.is_empty() {
            return false;
        }

        let delta: i32 = events.iter().map(|event| event.delta()).sum();
        let next = self
            .current
            .celsius()
            .saturating_add(delta)
            .clamp(self.min, self.max);

        if next == self.current.celsius() {
            return false;
        }

        self.current = Setpoint::new(next);
        self.deadline = DebounceTimer::new(self.quiescence_ms);
        self.deadline.reset(now_ms);
        true
    }

    /// Flushes a pending change once its quiescence window has passed.
    pub fn tick(&mut self, now_ms: u64) -> Option<FlushOutcome> {
        if !self.deadline.has_elapsed(now_ms) {
            return None;
        }

        if self.current == self.persisted {
            self.deadline.disarm();
            return Some(FlushOutcome::Unchanged(self.current));
        }

        match self.setting.save(self.current.celsius()) {
            Ok(()) => {
                self.deadline.disarm();
                self.persisted = self.current;
                Some(FlushOutcome::Saved(self.current))
            }
            Err(err) => {
                self.deadline = DebounceTimer::new(self.retry_ms);
                self.deadline.reset(now_ms);
                Some(FlushOutcome::Failed(err))
            }
        }
    }
}
