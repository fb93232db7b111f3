use embedded_hal::digital::OutputPin;

use crate::{
    config::ReadyThreshold,
    error::Fault,
    types::{HeaterState, Setpoint, Temperature, Transition, TransitionCause},
};

const HEATER_PIN: &str = "heater";

/// Two-state heater controller driving an active-high actuator.
///
/// The actuator is only written when the state changes, plus
/// [`Self::force_off`] at startup and shutdown.
#[derive(Debug)]
pub struct HeaterStateMachine<P> {
    actuator: P,
    state: HeaterState,
    threshold: ReadyThreshold,
}

impl<P: OutputPin> HeaterStateMachine<P> {
    /// Starts in `Off` with the actuator deasserted. A failed write is
    /// returned alongside the machine, which still assumes `Off`.
    pub fn new(actuator: P, threshold: ReadyThreshold) -> (Self, Option<Fault>) {
        let mut machine = Self {
            actuator,
            state: HeaterState::Off,
            threshold,
        };
        let fault = machine.force_off().err();
        (machine, fault)
    }

    pub fn state(&self) -> HeaterState {
        self.state
    }

    pub fn is_ready(&self, temperature: Temperature, setpoint: Setpoint) -> bool {
        let target = setpoint.as_temperature();
        match self.threshold {
            ReadyThreshold::AtOrAbove => temperature >= target,
            ReadyThreshold::Above => temperature > target,
        }
    }

    /// Evaluates one tick.
    ///
    /// An invalid reading freezes the state, manual toggles included. Reaching
    /// the setpoint while heating wins over a toggle in the same tick.
    pub fn step(
        &mut self,
        reading: Option<Temperature>,
        setpoint: Setpoint,
        manual_toggle: bool,
    ) -> Result<Option<Transition>, Fault> {
        let Some(temperature) = reading else {
            return Ok(None);
        };

        let (to, cause) = if self.state == HeaterState::Heating
            && self.is_ready(temperature, setpoint)
        {
            (HeaterState::Off, TransitionCause::SetpointReached)
        } else if manual_toggle {
            (self.state.toggled(), TransitionCause::ManualToggle)
        } else {
            return Ok(None);
        };

        let from = self.state;
        self.drive(to)?;
        Ok(Some(Transition { from, to, cause }))
    }

    /// Deasserts the actuator regardless of state.
    pub fn force_off(&mut self) -> Result<(), Fault> {
        self.drive(HeaterState::Off)
    }

    fn drive(&mut self, to: HeaterState) -> Result<(), Fault> {
        let written = match to {
            HeaterState::Heating => self.actuator.set_high(),
            HeaterState::Off => self.actuator.set_low(),
        };
        written.map_err(|err| Fault::pin(HEATER_PIN, err))?;

        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::MockPin;

    const SETPOINT: Setpoint = Setpoint::new(36);

    fn temp(deci_celsius: i32) -> Option<Temperature> {
        Some(Temperature::from_deci_celsius(deci_celsius))
    }

    fn heating_machine() -> (HeaterStateMachine<MockPin>, MockPin) {
        let pin = MockPin::new(false);
        let (mut machine, fault) = HeaterStateMachine::new(pin.clone(), ReadyThreshold::AtOrAbove);
        assert_eq!(fault, None);
        machine.step(temp(200), SETPOINT, true).unwrap();
        assert_eq!(machine.state(), HeaterState::Heating);
        (machine, pin)
    }

    #[test]
    fn construction_forces_actuator_low() {
        let pin = MockPin::new(true);
        let (machine, fault) = HeaterStateMachine::new(pin.clone(), ReadyThreshold::AtOrAbove);

        assert_eq!(fault, None);
        assert_eq!(machine.state(), HeaterState::Off);
        assert!(!pin.level());
        assert_eq!(pin.writes(), 1);
    }

    #[test]
    fn toggle_starts_heating_below_setpoint() {
        let pin = MockPin::new(false);
        let (mut machine, _) = HeaterStateMachine::new(pin.clone(), ReadyThreshold::AtOrAbove);

        assert_eq!(
            machine.step(temp(200), SETPOINT, true),
            Ok(Some(Transition {
                from: HeaterState::Off,
                to: HeaterState::Heating,
                cause: TransitionCause::ManualToggle,
            }))
        );
        assert!(pin.level());
    }

    #[test]
    fn invalid_reading_ignores_toggle_while_heating() {
        let (mut machine, pin) = heating_machine();

        assert_eq!(machine.step(None, SETPOINT, true), Ok(None));
        assert_eq!(machine.state(), HeaterState::Heating);
        assert!(pin.level());
    }

    #[test]
    fn invalid_reading_does_not_cut_off_heating() {
        let (mut machine, _) = heating_machine();

        for _ in 0..10 {
            assert_eq!(machine.step(None, SETPOINT, false), Ok(None));
        }
        assert_eq!(machine.state(), HeaterState::Heating);
    }

    #[test]
    fn setpoint_reached_wins_over_toggle() {
        let (mut machine, pin) = heating_machine();

        assert_eq!(
            machine.step(temp(360), SETPOINT, true),
            Ok(Some(Transition {
                from: HeaterState::Heating,
                to: HeaterState::Off,
                cause: TransitionCause::SetpointReached,
            }))
        );
        assert!(!pin.level());
    }

    #[test]
    fn manual_start_while_ready_is_cut_off_next_tick() {
        let pin = MockPin::new(false);
        let (mut machine, _) = HeaterStateMachine::new(pin.clone(), ReadyThreshold::AtOrAbove);

        let started = machine.step(temp(400), SETPOINT, true).unwrap();
        assert_eq!(started.map(|t| t.to), Some(HeaterState::Heating));
        assert!(pin.level());

        let stopped = machine.step(temp(400), SETPOINT, false).unwrap();
        assert_eq!(stopped.map(|t| t.cause), Some(TransitionCause::SetpointReached));
        assert!(!pin.level());
    }

    #[test]
    fn strict_threshold_needs_to_exceed_setpoint() {
        let pin = MockPin::new(false);
        let (mut machine, _) = HeaterStateMachine::new(pin, ReadyThreshold::Above);
        machine.step(temp(200), SETPOINT, true).unwrap();

        assert!(!machine.is_ready(Temperature::from_deci_celsius(360), SETPOINT));
        assert_eq!(machine.step(temp(360), SETPOINT, false), Ok(None));
        assert_eq!(machine.state(), HeaterState::Heating);

        assert!(machine.step(temp(361), SETPOINT, false).unwrap().is_some());
        assert_eq!(machine.state(), HeaterState::Off);
    }

    #[test]
    fn no_input_means_no_actuator_writes() {
        let (mut machine, pin) = heating_machine();
        let writes = pin.writes();

        for _ in 0..100 {
            machine.step(temp(300), SETPOINT, false).unwrap();
        }
        assert_eq!(pin.writes(), writes);
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let pin = MockPin::new(false);
        let (mut machine, _) = HeaterStateMachine::new(pin.clone(), ReadyThreshold::AtOrAbove);
        pin.set_failing(true);

        assert!(matches!(
            machine.step(temp(200), SETPOINT, true),
            Err(Fault::Pin { pin: "heater", .. })
        ));
        assert_eq!(machine.state(), HeaterState::Off);
    }
}
