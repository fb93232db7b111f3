pub mod config;
pub mod control;
pub mod display;
pub mod error;
pub mod hal;
pub mod heater;
pub mod input;
pub mod setpoint;
pub mod storage;
pub mod timer;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{
    ControlConfig, EncoderWiring, InputMode, PinMap, ReadyThreshold, RuntimeConfig, STORE_CAPACITY,
};
pub use control::{ControlLoop, SensorChange, Startup, TickReport};
pub use display::{StatusScreen, StatusView};
pub use error::{Fault, StorageError};
pub use hal::{Board, BoardParts, EepromImage, SettingStore, StatusDisplay, TemperatureSensor};
pub use heater::HeaterStateMachine;
pub use input::{ButtonPairDecoder, InputDecoder, ManualButton, QuadratureDecoder};
pub use setpoint::{FlushOutcome, LoadOutcome, SetpointController};
pub use storage::{PersistentSetting, RECORD_LEN, UNINITIALIZED};
pub use timer::DebounceTimer;
pub use types::{
    HeaterState, Setpoint, SetpointEvent, StatusSnapshot, StatusWord, Temperature, Transition,
    TransitionCause,
};
