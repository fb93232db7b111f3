use embedded_hal::digital::ErrorKind;

/// Failure reported by a [`crate::SettingStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("address range {addr}..{end} is outside the {capacity}-byte store")]
    OutOfRange {
        addr: usize,
        end: usize,
        capacity: usize,
    },
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Conditions the control loop detected and degraded around.
///
/// None of these stop the loop; they are reported so the binary can log
/// them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("temperature sensor disconnected, automatic control frozen")]
    SensorDisconnected,
    #[error("setpoint storage uninitialized, wrote default {0}")]
    StorageUninitialized(i32),
    #[error("{pin} pin fault: {kind:?}")]
    Pin { pin: &'static str, kind: ErrorKind },
    #[error("setpoint storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl Fault {
    pub(crate) fn pin<E: embedded_hal::digital::Error>(pin: &'static str, err: E) -> Self {
        Self::Pin {
            pin,
            kind: err.kind(),
        }
    }
}
