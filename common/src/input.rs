//! Operator input: setpoint knob/buttons and the manual override button.
//!
//! All buttons are wired active-low with pull-ups.

use embedded_hal::{delay::DelayNs, digital::InputPin};

use crate::{
    config::{ControlConfig, EncoderWiring, InputMode},
    error::Fault,
    timer::DebounceTimer,
    types::SetpointEvent,
};

/// Decodes one detent per edge of phase A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadratureDecoder {
    wiring: EncoderWiring,
    last_phase_a: Option<bool>,
}

impl QuadratureDecoder {
    pub fn new(wiring: EncoderWiring) -> Self {
        Self {
            wiring,
            last_phase_a: None,
        }
    }

    /// Feeds the instantaneous phase levels of one tick. The first call only
    /// records phase A so a knob resting high does not step at boot.
    pub fn update(&mut self, phase_a: bool, phase_b: bool) -> Option<SetpointEvent> {
        let last = self.last_phase_a.replace(phase_a)?;
        if last == phase_a {
            return None;
        }

        let event = if phase_b != phase_a {
            SetpointEvent::Decrement
        } else {
            SetpointEvent::Increment
        };

        Some(match self.wiring {
            EncoderWiring::Standard => event,
            EncoderWiring::Reversed => event.reversed(),
        })
    }
}

/// Discrete up/down buttons with a blocking settle-and-resample read.
///
/// Each pressed button costs one `settle_ms` wait per tick, so a tick blocks
/// for at most twice [`crate::config::MAX_BUTTON_SETTLE_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPairDecoder {
    settle_ms: u32,
}

impl ButtonPairDecoder {
    pub fn new(settle_ms: u32) -> Self {
        Self {
            settle_ms: settle_ms.min(crate::config::MAX_BUTTON_SETTLE_MS),
        }
    }

    fn settled_active<P, D>(&self, pin: &mut P, delay: &mut D) -> Result<bool, P::Error>
    where
        P: InputPin,
        D: DelayNs,
    {
        if !pin.is_low()? {
            return Ok(false);
        }
        delay.delay_ms(self.settle_ms);
        pin.is_low()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderMode {
    Quadrature(QuadratureDecoder),
    Buttons(ButtonPairDecoder),
}

/// Owns the two setpoint input pins and turns their levels into events.
#[derive(Debug)]
pub struct InputDecoder<A, B> {
    phase_a: A,
    phase_b: B,
    mode: DecoderMode,
}

impl<A: InputPin, B: InputPin> InputDecoder<A, B> {
    pub fn new(phase_a: A, phase_b: B, config: &ControlConfig) -> Self {
        let mode = match config.input_mode {
            InputMode::Encoder => {
                DecoderMode::Quadrature(QuadratureDecoder::new(config.encoder_wiring))
            }
            InputMode::Buttons => {
                DecoderMode::Buttons(ButtonPairDecoder::new(config.button_settle_ms))
            }
        };

        Self {
            phase_a,
            phase_b,
            mode,
        }
    }

    /// Reads the pins once. Encoder mode yields at most one event; button
    /// mode yields one per settled button, so up and down held together
    /// produce both events in the same tick.
    pub fn poll<D: DelayNs>(&mut self, delay: &mut D) -> Result<Vec<SetpointEvent>, Fault> {
        match &mut self.mode {
            DecoderMode::Quadrature(decoder) => {
                let a = self
                    .phase_a
                    .is_high()
                    .map_err(|err| Fault::pin("encoder phase A", err))?;
                let b = self
                    .phase_b
                    .is_high()
                    .map_err(|err| Fault::pin("encoder phase B", err))?;
                Ok(decoder.update(a, b).into_iter().collect())
            }
            DecoderMode::Buttons(decoder) => {
                let mut events = Vec::new();
                if decoder
                    .settled_active(&mut self.phase_a, delay)
                    .map_err(|err| Fault::pin("up button", err))?
                {
                    events.push(SetpointEvent::Increment);
                }
                if decoder
                    .settled_active(&mut self.phase_b, delay)
                    .map_err(|err| Fault::pin("down button", err))?
                {
                    events.push(SetpointEvent::Decrement);
                }
                Ok(events)
            }
        }
    }
}

/// Manual override button: one toggle per physical press.
///
/// The pin must read active for a full settle window before the press counts,
/// and a latch then suppresses further toggles until the pin is seen released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualButton {
    settle: DebounceTimer,
    latched: bool,
}

impl ManualButton {
    pub fn new(settle_ms: u64) -> Self {
        Self {
            settle: DebounceTimer::new(settle_ms),
            latched: false,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Returns true on the tick a press is recognized.
    pub fn update(&mut self, active: bool, now_ms: u64) -> bool {
        if !active {
            self.settle.disarm();
            self.latched = false;
            return false;
        }

        if self.latched {
            return false;
        }

        if !self.settle.is_armed() {
            self.settle.reset(now_ms);
        }

        if self.settle.has_elapsed(now_ms) {
            self.latched = true;
            return true;
        }

        false
    }
}
