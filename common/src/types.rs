use core::fmt;

use serde::{Deserialize, Serialize};

/// Temperature in tenths of a degree Celsius.
///
/// A sensor reading is an `Option<Temperature>`; `None` means the sensor is
/// disconnected and must never be replaced with an older value when deciding
/// what the heater does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature {
    deci_celsius: i32,
}

impl Temperature {
    pub const fn from_deci_celsius(deci_celsius: i32) -> Self {
        Self { deci_celsius }
    }

    /// Rounds to the nearest tenth. Returns `None` for non-finite input.
    pub fn from_celsius(celsius: f32) -> Option<Self> {
        if !celsius.is_finite() {
            return None;
        }
        Some(Self {
            deci_celsius: (celsius * 10.0).round() as i32,
        })
    }

    pub fn deci_celsius(self) -> i32 {
        self.deci_celsius
    }

    pub fn as_celsius(self) -> f32 {
        self.deci_celsius as f32 / 10.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.deci_celsius.unsigned_abs();
        if self.deci_celsius < 0 {
            write!(f, "-{}.{}", abs / 10, abs % 10)
        } else {
            write!(f, "{:2}.{}", abs / 10, abs % 10)
        }
    }
}

/// Operator-selected target temperature in whole degrees Celsius.
///
/// Bounds are enforced by [`crate::SetpointController`]; a bare `Setpoint` is
/// only a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Setpoint(i32);

impl Setpoint {
    pub const fn new(celsius: i32) -> Self {
        Self(celsius)
    }

    pub fn celsius(self) -> i32 {
        self.0
    }

    pub fn as_temperature(self) -> Temperature {
        Temperature::from_deci_celsius(self.0.saturating_mul(10))
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaterState {
    Off,
    Heating,
}

impl HeaterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heating => "HEATING",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Off => Self::Heating,
            Self::Heating => Self::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetpointEvent {
    Increment,
    Decrement,
}

impl SetpointEvent {
    pub fn delta(self) -> i32 {
        match self {
            Self::Increment => 1,
            Self::Decrement => -1,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Self::Increment => Self::Decrement,
            Self::Decrement => Self::Increment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionCause {
    SetpointReached,
    ManualToggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: HeaterState,
    pub to: HeaterState,
    pub cause: TransitionCause,
}

/// Semantic status word shown in the lower right corner of the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusWord {
    Ready,
    Start,
    Stop,
    Error,
}

impl StatusWord {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Error => "ERR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "lastValidTemp")]
    pub last_valid_temp: Option<f32>,
    pub setpoint: i32,
    #[serde(rename = "persistedSetpoint")]
    pub persisted_setpoint: i32,
    #[serde(rename = "savePending")]
    pub save_pending: bool,
    pub heater: &'static str,
    pub status: &'static str,
    pub ready: bool,
    #[serde(rename = "sensorValid")]
    pub sensor_valid: bool,
}
