use embedded_hal::digital::InputPin;

use crate::{
    config::ControlConfig,
    display::{StatusScreen, StatusView},
    error::Fault,
    hal::{Board, BoardParts, TemperatureSensor},
    heater::HeaterStateMachine,
    input::{InputDecoder, ManualButton},
    setpoint::{FlushOutcome, SetpointController},
    timer::DebounceTimer,
    types::{HeaterState, Setpoint, StatusSnapshot, Temperature, Transition},
};

/// Sample-level change of the temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorChange {
    Lost,
    Restored(Temperature),
    Changed(Temperature),
}

/// What happened during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub setpoint: Setpoint,
    pub reading: Option<Temperature>,
    pub faults: Vec<Fault>,
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub snapshot: StatusSnapshot,
    pub adjusted: Option<Setpoint>,
    pub flushed: Option<Setpoint>,
    pub transition: Option<Transition>,
    pub sensor: Option<SensorChange>,
    pub faults: Vec<Fault>,
}

/// The whole controller: owns every collaborator and all mutable state.
///
/// Time is milliseconds since [`Self::start`]; callers pass a monotonic clock.
pub struct ControlLoop<B: Board> {
    input: InputDecoder<B::PhaseA, B::PhaseB>,
    manual_pin: B::ManualButton,
    manual: ManualButton,
    heater: HeaterStateMachine<B::Heater>,
    sensor: B::Sensor,
    setpoint: SetpointController<B::Store>,
    display: B::Display,
    screen: StatusScreen,
    delay: B::Delay,
    sampler: DebounceTimer,
    reading: Option<Temperature>,
    last_valid: Option<Temperature>,
}

impl<B: Board> ControlLoop<B> {
    pub fn start(parts: BoardParts<B>, config: &ControlConfig) -> (Self, Startup) {
        let BoardParts {
            phase_a,
            phase_b,
            manual_button,
            heater,
            sensor,
            store,
            mut display,
            delay,
        } = parts;
        let mut faults = Vec::new();

        let (heater, heater_fault) = HeaterStateMachine::new(heater, config.ready_threshold);
        faults.extend(heater_fault);

        let mut screen = StatusScreen::new();
        screen.boot(&mut display);

        let (setpoint, loaded) = SetpointController::load(store, config);
        faults.extend(loaded.faults);

        let mut sampler = DebounceTimer::new(config.sample_period_ms);
        sampler.reset(0);

        let mut control = Self {
            input: InputDecoder::new(phase_a, phase_b, config),
            manual_pin: manual_button,
            manual: ManualButton::new(config.manual_settle_ms),
            heater,
            sensor,
            setpoint,
            display,
            screen,
            delay,
            sampler,
            reading: None,
            last_valid: None,
        };

        let reading = control.sensor.sample();
        if reading.is_none() {
            faults.push(Fault::SensorDisconnected);
        }
        control.record_reading(reading);
        control.render();

        let startup = Startup {
            setpoint: loaded.setpoint,
            reading,
            faults,
        };
        (control, startup)
    }

    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let mut faults = Vec::new();

        let sensor = if self.sampler.poll(now_ms) {
            let reading = self.sensor.sample();
            let change = self.record_reading(reading);
            if change == Some(SensorChange::Lost) {
                faults.push(Fault::SensorDisconnected);
            }
            change
        } else {
            None
        };

        let events = self.input.poll(&mut self.delay).unwrap_or_else(|fault| {
            faults.push(fault);
            Vec::new()
        });
        let adjusted = self
            .setpoint
            .apply_events(&events, now_ms)
            .then(|| self.setpoint.current());

        let flushed = match self.setpoint.tick(now_ms) {
            Some(FlushOutcome::Saved(value)) => Some(value),
            Some(FlushOutcome::Failed(err)) => {
                faults.push(Fault::Storage(err));
                None
            }
            Some(FlushOutcome::Unchanged(_)) | None => None,
        };

        let active = self.manual_pin.is_low().unwrap_or_else(|err| {
            faults.push(Fault::pin("manual button", err));
            false
        });
        let toggle = self.manual.update(active, now_ms);

        let transition = self
            .heater
            .step(self.reading, self.setpoint.current(), toggle)
            .unwrap_or_else(|fault| {
                faults.push(fault);
                None
            });

        self.render();

        TickReport {
            snapshot: self.snapshot(now_ms),
            adjusted,
            flushed,
            transition,
            sensor,
            faults,
        }
    }

    /// Deasserts the heater. The loop stays usable; a later tick may heat
    /// again on a manual toggle.
    pub fn shutdown(&mut self) -> Result<(), Fault> {
        self.heater.force_off()?;
        self.render();
        Ok(())
    }

    pub fn snapshot(&self, now_ms: u64) -> StatusSnapshot {
        let ready = self.is_ready();
        StatusSnapshot {
            uptime_ms: now_ms,
            current_temp: self.reading.map(Temperature::as_celsius),
            last_valid_temp: self.last_valid.map(Temperature::as_celsius),
            setpoint: self.setpoint.current().celsius(),
            persisted_setpoint: self.setpoint.persisted().celsius(),
            save_pending: self.setpoint.is_dirty(),
            heater: self.heater.state().as_str(),
            status: self.status_view().status.as_str(),
            ready,
            sensor_valid: self.reading.is_some(),
        }
    }

    pub fn heater_state(&self) -> HeaterState {
        self.heater.state()
    }

    pub fn setpoint(&self) -> Setpoint {
        self.setpoint.current()
    }

    pub fn reading(&self) -> Option<Temperature> {
        self.reading
    }

    fn is_ready(&self) -> bool {
        self.reading
            .is_some_and(|temperature| self.heater.is_ready(temperature, self.setpoint.current()))
    }

    fn record_reading(&mut self, reading: Option<Temperature>) -> Option<SensorChange> {
        let previous = std::mem::replace(&mut self.reading, reading);
        if let Some(temperature) = reading {
            self.last_valid = Some(temperature);
        }

        match (previous, reading) {
            (Some(_), None) => Some(SensorChange::Lost),
            (None, Some(temperature)) => Some(SensorChange::Restored(temperature)),
            (Some(before), Some(after)) if before != after => Some(SensorChange::Changed(after)),
            _ => None,
        }
    }

    fn status_view(&self) -> StatusView {
        let heater = self.heater.state();
        StatusView {
            temperature: self.last_valid,
            setpoint: self.setpoint.current(),
            heater,
            status: StatusView::status_word(self.reading.is_some(), self.is_ready(), heater),
        }
    }

    fn render(&mut self) {
        let view = self.status_view();
        self.screen.render(&mut self.display, &view);
    }
}
