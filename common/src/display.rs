//! 16x2 status screen.
//!
//! ```text
//! T=21.5°C  SET 36
//! HEATING   STOP
//! ```

use crate::{
    hal::StatusDisplay,
    types::{HeaterState, Setpoint, StatusWord, Temperature},
};

const BOOT_TEXT: &str = "Loading...";

// Each field is padded to its full width so a shorter value overwrites a
// longer one.
const TEMPERATURE_FIELD: Field = Field { row: 0, col: 0, width: 10 };
const SETPOINT_FIELD: Field = Field { row: 0, col: 10, width: 6 };
const HEATER_FIELD: Field = Field { row: 1, col: 0, width: 10 };
const STATUS_FIELD: Field = Field { row: 1, col: 10, width: 6 };

#[derive(Debug, Clone, Copy)]
struct Field {
    row: u8,
    col: u8,
    width: usize,
}

impl Field {
    fn draw<D: StatusDisplay>(self, display: &mut D, text: &str) {
        display.render(self.row, self.col, &format!("{text:<width$}", width = self.width));
    }
}

/// What the screen should show; derived from the control state each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    /// Last valid reading, kept on screen while the sensor is out.
    pub temperature: Option<Temperature>,
    pub setpoint: Setpoint,
    pub heater: HeaterState,
    pub status: StatusWord,
}

impl StatusView {
    pub fn status_word(sensor_valid: bool, ready: bool, heater: HeaterState) -> StatusWord {
        if !sensor_valid {
            StatusWord::Error
        } else if ready {
            StatusWord::Ready
        } else if heater == HeaterState::Heating {
            StatusWord::Stop
        } else {
            StatusWord::Start
        }
    }
}

/// Remembers what is on the glass and redraws only fields that changed.
#[derive(Debug, Default)]
pub struct StatusScreen {
    booting: bool,
    temperature: Option<Option<Temperature>>,
    setpoint: Option<Setpoint>,
    heater: Option<HeaterState>,
    status: Option<StatusWord>,
}

impl StatusScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boot<D: StatusDisplay>(&mut self, display: &mut D) {
        *self = Self {
            booting: true,
            ..Self::default()
        };
        display.clear();
        display.render(0, 0, BOOT_TEXT);
    }

    pub fn render<D: StatusDisplay>(&mut self, display: &mut D, view: &StatusView) {
        if std::mem::take(&mut self.booting) {
            display.clear();
        }

        if self.temperature != Some(view.temperature) {
            let text = match view.temperature {
                Some(temperature) => format!("T={temperature}°C"),
                None => "T=--.-°C".to_string(),
            };
            TEMPERATURE_FIELD.draw(display, &text);
            self.temperature = Some(view.temperature);
        }

        if self.setpoint != Some(view.setpoint) {
            SETPOINT_FIELD.draw(display, &format!("SET {}", view.setpoint));
            self.setpoint = Some(view.setpoint);
        }

        if self.heater != Some(view.heater) {
            let text = match view.heater {
                HeaterState::Heating => "HEATING",
                HeaterState::Off => "",
            };
            HEATER_FIELD.draw(display, text);
            self.heater = Some(view.heater);
        }

        if self.status != Some(view.status) {
            STATUS_FIELD.draw(display, view.status.as_str());
            self.status = Some(view.status);
        }
    }
}
