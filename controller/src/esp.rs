use core::convert::TryInto;
use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use ds18b20::{Ds18b20, Resolution};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, AnyOutputPin, Input, InputOutput, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
};
use log::{debug, info, warn};
use one_wire_bus::{Address, OneWire};

use heatknob_common::{
    Board, BoardParts, ControlLoop, DebounceTimer, EepromImage, PinMap, RuntimeConfig,
    SensorChange, SettingStore, StatusDisplay, StorageError, Temperature, TemperatureSensor,
    TickReport, STORE_CAPACITY,
};

const NVS_NAMESPACE: &str = "thermostat";
const NVS_CONFIG_KEY: &str = "config_json";
const NVS_EEPROM_KEY: &str = "eeprom";
const EEPROM_CAPACITY: usize = STORE_CAPACITY;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const STATUS_LOG_PERIOD_MS: u64 = 10_000;
const LCD_COLUMNS: usize = 16;
// Disconnect marker some DS18B20 drivers report in place of an error.
const DS18B20_DISCONNECTED_C: f32 = -127.0;

type GpioInput = PinDriver<'static, AnyIOPin, Input>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let RuntimeConfig {
        control: config,
        pins,
    } = runtime;
    info!(
        "NVS config loaded: setpoint {}..={} (default {}), input {:?}, DS18B20 {}-bit",
        config.min_setpoint_c,
        config.max_setpoint_c,
        config.default_setpoint_c,
        config.input_mode,
        config.sensor_resolution_bits,
    );

    let parts = take_board(&pins, &nvs_partition, config.sensor_resolution_bits)?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    monotonic_ms();
    let (mut control, startup) = ControlLoop::start(parts, &config);
    info!(
        "controller started: setpoint {}, temperature {:?}",
        startup.setpoint, startup.reading
    );
    for fault in &startup.faults {
        warn!("{fault}");
    }

    let tick = Duration::from_millis(config.tick_period_ms);
    let mut status_log = DebounceTimer::new(STATUS_LOG_PERIOD_MS);

    loop {
        let now_ms = monotonic_ms();
        let report = control.tick(now_ms);
        log_report(&report);

        if status_log.poll(now_ms) {
            match serde_json::to_string(&report.snapshot) {
                Ok(body) => info!("status {body}"),
                Err(err) => warn!("status serialization failed: {err}"),
            }
        }

        feed_watchdog();
        thread::sleep(tick);
    }
}

struct EspBoard;

impl Board for EspBoard {
    type PhaseA = GpioInput;
    type PhaseB = GpioInput;
    type ManualButton = GpioInput;
    type Heater = PinDriver<'static, AnyOutputPin, Output>;
    type Sensor = Ds18b20Sensor;
    type Store = NvsEeprom;
    type Display = LogDisplay;
    type Delay = FreeRtos;
}

fn take_board(
    pins: &PinMap,
    partition: &EspDefaultNvsPartition,
    resolution_bits: u8,
) -> anyhow::Result<BoardParts<EspBoard>> {
    let heater = unsafe { PinDriver::output(AnyOutputPin::new(pins.heater)) }?;

    Ok(BoardParts {
        phase_a: pulled_up_input(pins.phase_a)?,
        phase_b: pulled_up_input(pins.phase_b)?,
        manual_button: pulled_up_input(pins.manual_button)?,
        heater,
        sensor: Ds18b20Sensor::new(pins.one_wire, resolution_bits)?,
        store: NvsEeprom::open(partition.clone())?,
        display: LogDisplay::new(),
        delay: FreeRtos,
    })
}

fn pulled_up_input(pin: i32) -> anyhow::Result<GpioInput> {
    let mut driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) }?;
    driver.set_pull(Pull::Up)?;
    Ok(driver)
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// EEPROM image kept as a single NVS blob; every write commits the whole image.
struct NvsEeprom {
    nvs: EspNvs<NvsDefault>,
    image: EepromImage,
}

impl NvsEeprom {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; EEPROM_CAPACITY];
        let image = match nvs.get_blob(NVS_EEPROM_KEY, &mut buffer)? {
            Some(raw) => EepromImage::from_bytes(raw.to_vec(), EEPROM_CAPACITY),
            None => EepromImage::erased(EEPROM_CAPACITY),
        };
        Ok(Self { nvs, image })
    }
}

impl SettingStore for NvsEeprom {
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.image.read(addr, buf)
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let mut next = self.image.clone();
        next.write(addr, bytes)?;
        self.nvs
            .set_blob(NVS_EEPROM_KEY, next.as_bytes())
            .map_err(|err| StorageError::Backend(format!("NVS blob write failed: {err}")))?;
        self.image = next;
        Ok(())
    }
}

struct Ds18b20Sensor {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    resolution: Resolution,
    gpio: i32,
    delay: Ets,
}

impl Ds18b20Sensor {
    fn new(gpio: i32, resolution_bits: u8) -> anyhow::Result<Self> {
        let mut pin = unsafe { PinDriver::input_output_od(AnyIOPin::new(gpio)) }?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        let one_wire = OneWire::new(pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut sensor = Self {
            one_wire,
            address: None,
            resolution: resolution_from_bits(resolution_bits),
            gpio,
            delay: Ets,
        };
        sensor.refresh_address();
        Ok(sensor)
    }

    fn refresh_address(&mut self) {
        let mut found = None;
        for device in self.one_wire.devices(false, &mut self.delay) {
            match device {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    found = Some(address);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.address = found;
        let Some(address) = found else {
            warn!("no DS18B20 found on GPIO{}", self.gpio);
            return;
        };

        match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(device) => {
                if let Err(err) = device.set_config(
                    i8::MIN,
                    i8::MAX,
                    self.resolution,
                    &mut self.one_wire,
                    &mut self.delay,
                ) {
                    warn!("failed to set DS18B20 resolution: {err:?}");
                }
                info!("DS18B20 ready on GPIO{} ({:?})", self.gpio, address);
            }
            Err(err) => {
                warn!("invalid DS18B20 address {:?}: {err:?}", address);
                self.address = None;
            }
        }
    }

    fn read_celsius(&mut self) -> Option<f32> {
        if self.address.is_none() {
            self.refresh_address();
        }

        let address = self.address?;
        let device = Ds18b20::new::<core::convert::Infallible>(address).ok()?;

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            debug!("failed to start DS18B20 conversion: {err:?}");
            self.address = None;
            return None;
        }

        self.resolution.delay_for_measurement_time(&mut self.delay);

        match device.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) if data.temperature > DS18B20_DISCONNECTED_C => Some(data.temperature),
            Ok(_) => None,
            Err(err) => {
                debug!("failed to read DS18B20 data: {err:?}");
                self.address = None;
                None
            }
        }
    }
}

impl TemperatureSensor for Ds18b20Sensor {
    fn sample(&mut self) -> Option<Temperature> {
        self.read_celsius().and_then(Temperature::from_celsius)
    }
}

fn resolution_from_bits(bits: u8) -> Resolution {
    match bits {
        9 => Resolution::Bits9,
        10 => Resolution::Bits10,
        11 => Resolution::Bits11,
        _ => Resolution::Bits12,
    }
}

/// Screen contents mirrored to the log; the boards this targets have no
/// character LCD attached.
struct LogDisplay {
    rows: [[char; LCD_COLUMNS]; 2],
}

impl LogDisplay {
    fn new() -> Self {
        Self {
            rows: [[' '; LCD_COLUMNS]; 2],
        }
    }
}

impl StatusDisplay for LogDisplay {
    fn clear(&mut self) {
        self.rows = [[' '; LCD_COLUMNS]; 2];
    }

    fn render(&mut self, row: u8, col: u8, text: &str) {
        let Some(line) = self.rows.get_mut(usize::from(row)) else {
            return;
        };
        for (cell, ch) in line.iter_mut().skip(usize::from(col)).zip(text.chars()) {
            *cell = ch;
        }
        let [top, bottom] = &self.rows;
        debug!(
            "lcd |{}|{}|",
            top.iter().collect::<String>(),
            bottom.iter().collect::<String>()
        );
    }
}

fn log_report(report: &TickReport) {
    if let Some(setpoint) = report.adjusted {
        info!("setpoint adjusted to {setpoint}°C");
    }
    if let Some(setpoint) = report.flushed {
        info!("setpoint {setpoint}°C saved to NVS");
    }
    if let Some(transition) = report.transition {
        info!(
            "heater {} -> {} ({:?})",
            transition.from.as_str(),
            transition.to.as_str(),
            transition.cause,
        );
    }
    match report.sensor {
        Some(SensorChange::Lost) => debug!("temperature sample lost"),
        Some(SensorChange::Restored(reading)) => info!("temperature sensor back: {reading}°C"),
        Some(SensorChange::Changed(reading)) => debug!("temperature {reading}°C"),
        None => {}
    }
    for fault in &report.faults {
        warn!("{fault}");
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
