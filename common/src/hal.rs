//! Collaborator interfaces the engine drives. Digital pins and delays use the
//! `embedded-hal` traits directly; the rest are defined here.

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::{error::StorageError, types::Temperature};

pub trait TemperatureSensor {
    /// Takes one reading. `None` when the sensor is disconnected or the
    /// reading is unusable.
    fn sample(&mut self) -> Option<Temperature>;
}

/// Byte-addressable non-volatile store.
pub trait SettingStore {
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Fixed-width character display.
pub trait StatusDisplay {
    fn clear(&mut self);
    fn render(&mut self, row: u8, col: u8, text: &str);
}

/// Concrete collaborator types of one board.
pub trait Board {
    type PhaseA: InputPin;
    type PhaseB: InputPin;
    type ManualButton: InputPin;
    type Heater: OutputPin;
    type Sensor: TemperatureSensor;
    type Store: SettingStore;
    type Display: StatusDisplay;
    type Delay: DelayNs;
}

/// Owned collaborators handed to [`crate::ControlLoop::start`].
pub struct BoardParts<B: Board> {
    pub phase_a: B::PhaseA,
    pub phase_b: B::PhaseB,
    pub manual_button: B::ManualButton,
    pub heater: B::Heater,
    pub sensor: B::Sensor,
    pub store: B::Store,
    pub display: B::Display,
    pub delay: B::Delay,
}

/// Byte image of a small EEPROM. Erased cells read `0xFF`, so an
/// uninitialized 4-byte record decodes to `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromImage {
    bytes: Vec<u8>,
}

impl EepromImage {
    pub const ERASED: u8 = 0xFF;

    pub fn erased(capacity: usize) -> Self {
        Self {
            bytes: vec![Self::ERASED; capacity],
        }
    }

    /// Wraps an existing image, padding or truncating to `capacity`.
    pub fn from_bytes(mut bytes: Vec<u8>, capacity: usize) -> Self {
        bytes.resize(capacity, Self::ERASED);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(&self, addr: usize, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let end = addr.saturating_add(len);
        if end > self.bytes.len() {
            return Err(StorageError::OutOfRange {
                addr,
                end,
                capacity: self.bytes.len(),
            });
        }
        Ok(addr..end)
    }
}

impl SettingStore for EepromImage {
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let range = self.range(addr, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}
