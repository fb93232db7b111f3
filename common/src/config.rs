use serde::{Deserialize, Serialize};

use crate::storage::{RECORD_LEN, UNINITIALIZED};

/// Largest blocking settle wait the discrete-button decoder may perform.
pub const MAX_BUTTON_SETTLE_MS: u32 = 500;

/// Size of the byte-addressed setting store both binaries provide.
pub const STORE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputMode {
    Encoder,
    Buttons,
}

/// Direction mapping of the encoder phase pins. `Standard` matches the
/// reference board (CLK on phase A, DT on phase B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncoderWiring {
    Standard,
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadyThreshold {
    /// Ready once `temperature >= setpoint`.
    AtOrAbove,
    /// Ready once `temperature > setpoint`.
    Above,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub min_setpoint_c: i32,
    pub max_setpoint_c: i32,
    pub default_setpoint_c: i32,
    pub setpoint_addr: usize,
    pub persist_quiescence_ms: u64,
    pub persist_retry_ms: u64,
    pub sample_period_ms: u64,
    pub manual_settle_ms: u64,
    pub button_settle_ms: u32,
    pub input_mode: InputMode,
    pub encoder_wiring: EncoderWiring,
    pub ready_threshold: ReadyThreshold,
    pub sensor_resolution_bits: u8,
    pub tick_period_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_setpoint_c: 10,
            max_setpoint_c: 60,
            default_setpoint_c: 36,
            setpoint_addr: 4,
            persist_quiescence_ms: 5_000,
            persist_retry_ms: 1_000,
            sample_period_ms: 2_000,
            manual_settle_ms: 200,
            button_settle_ms: 200,
            input_mode: InputMode::Encoder,
            encoder_wiring: EncoderWiring::Standard,
            ready_threshold: ReadyThreshold::AtOrAbove,
            sensor_resolution_bits: 9,
            tick_period_ms: 5,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        // Keeps the erased-record sentinel out of the settable range.
        self.min_setpoint_c = self.min_setpoint_c.max(UNINITIALIZED + 1);
        if self.min_setpoint_c >= self.max_setpoint_c {
            self.min_setpoint_c = defaults.min_setpoint_c;
            self.max_setpoint_c = defaults.max_setpoint_c;
        }
        self.default_setpoint_c = self
            .default_setpoint_c
            .clamp(self.min_setpoint_c, self.max_setpoint_c);

        if self.setpoint_addr > STORE_CAPACITY - RECORD_LEN {
            self.setpoint_addr = defaults.setpoint_addr;
        }

        if self.persist_quiescence_ms == 0 {
            self.persist_quiescence_ms = defaults.persist_quiescence_ms;
        }
        self.persist_retry_ms = self.persist_retry_ms.max(250);
        if self.sample_period_ms == 0 {
            self.sample_period_ms = defaults.sample_period_ms;
        }
        self.button_settle_ms = self.button_settle_ms.min(MAX_BUTTON_SETTLE_MS);
        self.sensor_resolution_bits = self.sensor_resolution_bits.clamp(9, 12);
        self.tick_period_ms = self.tick_period_ms.clamp(1, 100);
    }
}

/// GPIO numbers of the board. Phase A doubles as the "up" button and phase B
/// as the "down" button in [`InputMode::Buttons`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub phase_a: i32,
    pub phase_b: i32,
    pub manual_button: i32,
    pub heater: i32,
    pub one_wire: i32,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            phase_a: 11,
            phase_b: 10,
            manual_button: 12,
            heater: 13,
            one_wire: 2,
        }
    }
}

impl PinMap {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        for (pin, fallback) in [
            (&mut self.phase_a, defaults.phase_a),
            (&mut self.phase_b, defaults.phase_b),
            (&mut self.manual_button, defaults.manual_button),
            (&mut self.heater, defaults.heater),
            (&mut self.one_wire, defaults.one_wire),
        ] {
            if *pin < 0 {
                *pin = fallback;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub pins: PinMap,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.control.sanitize();
        self.pins.sanitize();
    }
}
