//! Test doubles shared by the unit tests of this crate.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use embedded_hal::{
    delay::DelayNs,
    digital::{self, ErrorKind, ErrorType, InputPin, OutputPin},
};

use crate::{
    error::StorageError,
    hal::{Board, EepromImage, SettingStore, StatusDisplay, TemperatureSensor},
    types::Temperature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFailure;

impl digital::Error for PinFailure {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug, Default)]
struct PinState {
    high: bool,
    script: VecDeque<bool>,
    failing: bool,
    writes: u32,
}

/// Shared-state pin usable as input or output; clones observe the same level.
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    state: Rc<RefCell<PinState>>,
}

impl MockPin {
    pub fn new(high: bool) -> Self {
        let pin = Self::default();
        pin.set_level(high);
        pin
    }

    /// Reads return the scripted levels in order, then stick at the last one.
    pub fn with_script(levels: &[bool]) -> Self {
        let pin = Self::default();
        {
            let mut state = pin.state.borrow_mut();
            state.script = levels.iter().copied().collect();
            state.high = levels.last().copied().unwrap_or(false);
        }
        pin
    }

    pub fn set_level(&self, high: bool) {
        self.state.borrow_mut().high = high;
    }

    pub fn level(&self) -> bool {
        self.state.borrow().high
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    pub fn writes(&self) -> u32 {
        self.state.borrow().writes
    }

    fn read(&self) -> Result<bool, PinFailure> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(PinFailure);
        }
        Ok(state.script.pop_front().unwrap_or(state.high))
    }

    fn write(&self, high: bool) -> Result<(), PinFailure> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(PinFailure);
        }
        state.high = high;
        state.writes += 1;
        Ok(())
    }
}

impl ErrorType for MockPin {
    type Error = PinFailure;
}

impl InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.read()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.read().map(|high| !high)
    }
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDelay {
    total_ns: Rc<RefCell<u64>>,
}

impl MockDelay {
    pub fn total_ms(&self) -> u64 {
        *self.total_ns.borrow() / 1_000_000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        *self.total_ns.borrow_mut() += u64::from(ns);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    reading: Rc<RefCell<Option<Temperature>>>,
    samples: Rc<RefCell<u32>>,
}

impl MockSensor {
    pub fn reading(deci_celsius: i32) -> Self {
        let sensor = Self::default();
        sensor.set(Some(Temperature::from_deci_celsius(deci_celsius)));
        sensor
    }

    pub fn set(&self, reading: Option<Temperature>) {
        *self.reading.borrow_mut() = reading;
    }

    pub fn samples(&self) -> u32 {
        *self.samples.borrow()
    }
}

impl TemperatureSensor for MockSensor {
    fn sample(&mut self) -> Option<Temperature> {
        *self.samples.borrow_mut() += 1;
        *self.reading.borrow()
    }
}

#[derive(Debug)]
struct StoreState {
    image: EepromImage,
    writes: Vec<(usize, Vec<u8>)>,
    failing: bool,
}

/// EEPROM image that records every write.
#[derive(Debug, Clone)]
pub struct MockStore {
    state: Rc<RefCell<StoreState>>,
}

impl MockStore {
    pub fn erased() -> Self {
        Self {
            state: Rc::new(RefCell::new(StoreState {
                image: EepromImage::erased(16),
                writes: Vec::new(),
                failing: false,
            })),
        }
    }

    pub fn with_value(addr: usize, value: i32) -> Self {
        let store = Self::erased();
        store
            .state
            .borrow_mut()
            .image
            .write(addr, &value.to_le_bytes())
            .unwrap();
        store
    }

    pub fn value_at(&self, addr: usize) -> i32 {
        let mut record = [0_u8; 4];
        self.state
            .borrow_mut()
            .image
            .read(addr, &mut record)
            .unwrap();
        i32::from_le_bytes(record)
    }

    pub fn write_count(&self) -> usize {
        self.state.borrow().writes.len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }
}

impl SettingStore for MockStore {
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(StorageError::Backend("mock read failure".to_string()));
        }
        state.image.read(addr, buf)
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(StorageError::Backend("mock write failure".to_string()));
        }
        state.writes.push((addr, bytes.to_vec()));
        state.image.write(addr, bytes)
    }
}

/// Character grid with the same 16x2 geometry as the reference LCD.
#[derive(Debug, Clone)]
pub struct MockDisplay {
    rows: Rc<RefCell<[[char; 16]; 2]>>,
    renders: Rc<RefCell<u32>>,
}

impl Default for MockDisplay {
    fn default() -> Self {
        Self {
            rows: Rc::new(RefCell::new([[' '; 16]; 2])),
            renders: Rc::new(RefCell::new(0)),
        }
    }
}

impl MockDisplay {
    pub fn row(&self, row: usize) -> String {
        self.rows.borrow()[row].iter().collect()
    }

    pub fn renders(&self) -> u32 {
        *self.renders.borrow()
    }
}

impl StatusDisplay for MockDisplay {
    fn clear(&mut self) {
        *self.rows.borrow_mut() = [[' '; 16]; 2];
    }

    fn render(&mut self, row: u8, col: u8, text: &str) {
        *self.renders.borrow_mut() += 1;
        let mut rows = self.rows.borrow_mut();
        let Some(line) = rows.get_mut(usize::from(row)) else {
            return;
        };
        for (offset, ch) in text.chars().enumerate() {
            if let Some(cell) = line.get_mut(usize::from(col) + offset) {
                *cell = ch;
            }
        }
    }
}

pub struct MockBoard;

impl Board for MockBoard {
    type PhaseA = MockPin;
    type PhaseB = MockPin;
    type ManualButton = MockPin;
    type Heater = MockPin;
    type Sensor = MockSensor;
    type Store = MockStore;
    type Display = MockDisplay;
    type Delay = MockDelay;
}
