use std::{
    collections::VecDeque,
    convert::Infallible,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use heatknob_common::{
    Board, BoardParts, ControlConfig, ControlLoop, DebounceTimer, EepromImage, EncoderWiring,
    InputMode, RuntimeConfig, SensorChange, SettingStore, StatusDisplay, StorageError,
    Temperature, TemperatureSensor, TickReport, STORE_CAPACITY,
};

const EEPROM_CAPACITY: usize = STORE_CAPACITY;
const STATUS_LOG_PERIOD_MS: u64 = 10_000;
const AMBIENT_C: f32 = 20.0;
const HEATER_EQUILIBRIUM_C: f32 = 80.0;
const THERMAL_TIME_CONSTANT_S: f32 = 300.0;
const LCD_COLUMNS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Up,
    Down,
    Press,
    Disconnect,
    Reconnect,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` (use + - b x c q)")]
    Unknown(String),
}

impl FromStr for OperatorCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "+" | "u" | "up" => Ok(Self::Up),
            "-" | "d" | "down" => Ok(Self::Down),
            "b" | "press" => Ok(Self::Press),
            "x" | "disconnect" => Ok(Self::Disconnect),
            "c" | "connect" => Ok(Self::Reconnect),
            "q" | "quit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

struct DataStore {
    config_path: PathBuf,
    eeprom_path: PathBuf,
}

impl DataStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));

        Self {
            config_path: data_dir.join("config.json"),
            eeprom_path: data_dir.join("eeprom.bin"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// EEPROM emulated by a byte image file, rewritten on every write.
struct FileEeprom {
    path: PathBuf,
    image: EepromImage,
}

impl FileEeprom {
    async fn open(path: &Path, capacity: usize) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let image = match tokio::fs::read(path).await {
            Ok(raw) => EepromImage::from_bytes(raw, capacity),
            Err(err) if err.kind() == ErrorKind::NotFound => EepromImage::erased(capacity),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            image,
        })
    }
}

impl SettingStore for FileEeprom {
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.image.read(addr, buf)
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), StorageError> {
        let mut next = self.image.clone();
        next.write(addr, bytes)?;
        std::fs::write(&self.path, next.as_bytes())
            .map_err(|err| StorageError::Backend(format!("{}: {err}", self.path.display())))?;
        self.image = next;
        Ok(())
    }
}

/// Water tank heated by the simulated element; relaxes exponentially towards
/// the element's equilibrium while heating and towards ambient otherwise.
struct SimulatedSensor {
    heater: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    temperature_c: f32,
    last_sample: Option<Instant>,
}

impl SimulatedSensor {
    fn advance(&mut self, elapsed_s: f32) {
        let target = if self.heater.load(Ordering::Relaxed) {
            HEATER_EQUILIBRIUM_C
        } else {
            AMBIENT_C
        };
        let blend = 1.0 - (-elapsed_s / THERMAL_TIME_CONSTANT_S).exp();
        self.temperature_c += (target - self.temperature_c) * blend;
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn sample(&mut self) -> Option<Temperature> {
        let now = Instant::now();
        if let Some(last) = self.last_sample.replace(now) {
            self.advance(now.duration_since(last).as_secs_f32());
        }

        if !self.connected.load(Ordering::Relaxed) {
            return None;
        }
        Temperature::from_celsius(self.temperature_c)
    }
}

/// Input line backed by a level the operator panel drives.
struct SimInput {
    high: Arc<AtomicBool>,
}

impl ErrorType for SimInput {
    type Error = Infallible;
}

impl InputPin for SimInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high.load(Ordering::Relaxed))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high.load(Ordering::Relaxed))
    }
}

struct SimHeater {
    on: Arc<AtomicBool>,
}

impl ErrorType for SimHeater {
    type Error = Infallible;
}

impl OutputPin for SimHeater {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.on.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.on.store(true, Ordering::Relaxed);
        Ok(())
    }
}

struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// 16x2 character buffer echoed to the log whenever it changes.
struct ConsoleDisplay {
    rows: [[char; LCD_COLUMNS]; 2],
}

impl ConsoleDisplay {
    fn new() -> Self {
        Self {
            rows: [[' '; LCD_COLUMNS]; 2],
        }
    }

    fn row(&self, row: usize) -> String {
        self.rows[row].iter().collect()
    }
}

impl StatusDisplay for ConsoleDisplay {
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
        debug!("lcd |{}|{}|", self.row(0), self.row(1));
    }
}

struct SimBoard;

impl Board for SimBoard {
    type PhaseA = SimInput;
    type PhaseB = SimInput;
    type ManualButton = SimInput;
    type Heater = SimHeater;
    type Sensor = SimulatedSensor;
    type Store = FileEeprom;
    type Display = ConsoleDisplay;
    type Delay = ThreadDelay;
}

/// Turns operator commands into pin levels, the way a hand on the knob would.
struct SimPanel {
    phase_a: Arc<AtomicBool>,
    phase_b: Arc<AtomicBool>,
    manual: Arc<AtomicBool>,
    heater: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    input_mode: InputMode,
    wiring: EncoderWiring,
    manual_hold_ms: u64,
    /// Setpoint steps waiting for the decoder; it sees at most one per tick.
    pending_steps: VecDeque<bool>,
    step_in_flight: bool,
    manual_release_at_ms: Option<u64>,
}

impl SimPanel {
    fn new(config: &ControlConfig) -> Self {
        Self {
            // Pull-ups: every input idles high.
            phase_a: Arc::new(AtomicBool::new(true)),
            phase_b: Arc::new(AtomicBool::new(true)),
            manual: Arc::new(AtomicBool::new(true)),
            heater: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(true)),
            input_mode: config.input_mode,
            wiring: config.encoder_wiring,
            manual_hold_ms: config
                .manual_settle_ms
                .saturating_add(config.tick_period_ms.saturating_mul(2)),
            pending_steps: VecDeque::new(),
            step_in_flight: false,
            manual_release_at_ms: None,
        }
    }

    fn parts(&self, eeprom: FileEeprom) -> BoardParts<SimBoard> {
        BoardParts {
            phase_a: SimInput {
                high: self.phase_a.clone(),
            },
            phase_b: SimInput {
                high: self.phase_b.clone(),
            },
            manual_button: SimInput {
                high: self.manual.clone(),
            },
            heater: SimHeater {
                on: self.heater.clone(),
            },
            sensor: SimulatedSensor {
                heater: self.heater.clone(),
                connected: self.connected.clone(),
                temperature_c: AMBIENT_C,
                last_sample: None,
            },
            store: eeprom,
            display: ConsoleDisplay::new(),
            delay: ThreadDelay,
        }
    }

    fn apply(&mut self, command: OperatorCommand, now_ms: u64) {
        match command {
            OperatorCommand::Up => self.queue_step(true),
            OperatorCommand::Down => self.queue_step(false),
            OperatorCommand::Press => {
                self.manual.store(false, Ordering::Relaxed);
                self.manual_release_at_ms = Some(now_ms.saturating_add(self.manual_hold_ms));
            }
            OperatorCommand::Disconnect => self.connected.store(false, Ordering::Relaxed),
            OperatorCommand::Reconnect => self.connected.store(true, Ordering::Relaxed),
            OperatorCommand::Quit => {}
        }
    }

    fn queue_step(&mut self, up: bool) {
        if self.step_in_flight {
            self.pending_steps.push_back(up);
        } else {
            self.step_setpoint(up);
        }
    }

    fn step_setpoint(&mut self, up: bool) {
        self.step_in_flight = true;
        match self.input_mode {
            InputMode::Encoder => {
                let up = match self.wiring {
                    EncoderWiring::Standard => up,
                    EncoderWiring::Reversed => !up,
                };
                let a = !self.phase_a.load(Ordering::Relaxed);
                self.phase_a.store(a, Ordering::Relaxed);
                self.phase_b.store(if up { a } else { !a }, Ordering::Relaxed);
            }
            InputMode::Buttons => {
                let pin = if up { &self.phase_a } else { &self.phase_b };
                pin.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Releases buttons held by earlier commands and presents the next
    /// queued setpoint step. Called after each tick, so a setpoint button is
    /// seen pressed for exactly one tick.
    fn release_due(&mut self, now_ms: u64) {
        if std::mem::take(&mut self.step_in_flight) && self.input_mode == InputMode::Buttons {
            self.phase_a.store(true, Ordering::Relaxed);
            self.phase_b.store(true, Ordering::Relaxed);
        }
        if let Some(up) = self.pending_steps.pop_front() {
            self.step_setpoint(up);
        }
        if self
            .manual_release_at_ms
            .is_some_and(|release_at| now_ms >= release_at)
        {
            self.manual.store(true, Ordering::Relaxed);
            self.manual_release_at_ms = None;
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = DataStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    if let Some(tick_ms) = std::env::var("THERMOSTAT_TICK_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        runtime.control.tick_period_ms = tick_ms;
    }
    runtime.sanitize();

    let config = runtime.control;
    info!(
        "config loaded: setpoint {}..={} (default {}), input {:?}, ready {:?}, tick {}ms",
        config.min_setpoint_c,
        config.max_setpoint_c,
        config.default_setpoint_c,
        config.input_mode,
        config.ready_threshold,
        config.tick_period_ms,
    );

    let eeprom = FileEeprom::open(&store.eeprom_path, EEPROM_CAPACITY)
        .await
        .with_context(|| format!("failed to open {}", store.eeprom_path.display()))?;

    let mut panel = SimPanel::new(&config);
    // Uptime counts from here.
    monotonic_ms();
    let (mut control, startup) = ControlLoop::start(panel.parts(eeprom), &config);
    info!(
        "controller started: setpoint {}, temperature {}",
        startup.setpoint,
        startup
            .reading
            .map(|reading| format!("{reading}°C"))
            .unwrap_or_else(|| "unavailable".to_string()),
    );
    for fault in &startup.faults {
        warn!("{fault}");
    }

    let (commands_tx, mut commands) = mpsc::channel(16);
    spawn_operator_console(commands_tx);
    info!("operator console ready: + / - adjust setpoint, b press button, x / c unplug / plug sensor, q quit");

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_period_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_log = DebounceTimer::new(STATUS_LOG_PERIOD_MS);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = monotonic_ms();
                let report = tokio::task::block_in_place(|| control.tick(now_ms));
                panel.release_due(now_ms);
                log_report(&report);

                if status_log.poll(now_ms) {
                    match serde_json::to_string(&report.snapshot) {
                        Ok(body) => info!("status {body}"),
                        Err(err) => warn!("status serialization failed: {err}"),
                    }
                }
            }
            Some(command) = commands.recv() => {
                if command == OperatorCommand::Quit {
                    info!("quit requested");
                    break;
                }
                debug!("operator command {command:?}");
                panel.apply(command, monotonic_ms());
            }
            result = &mut ctrl_c => {
                if let Err(err) = result {
                    warn!("ctrl-c handler failed: {err}");
                }
                info!("interrupted");
                break;
            }
        }
    }

    control
        .shutdown()
        .context("failed to switch heater off on shutdown")?;
    info!("heater off, controller stopped");
    Ok(())
}

fn spawn_operator_console(commands: mpsc::Sender<OperatorCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("operator console closed");
                    return;
                }
                Err(err) => {
                    warn!("operator console read failed: {err}");
                    return;
                }
            };

            match line.parse::<OperatorCommand>() {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        return;
                    }
                }
                Err(CommandError::Empty) => {}
                Err(err) => warn!("{err}"),
            }
        }
    });
}

fn log_report(report: &TickReport) {
    if let Some(setpoint) = report.adjusted {
        info!("setpoint adjusted to {setpoint}°C");
    }
    if let Some(setpoint) = report.flushed {
        info!("setpoint {setpoint}°C saved to storage");
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use heatknob_common::{HeaterState, Setpoint};
    use pretty_assertions::assert_eq;

    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("heatknob-{}-{name}", std::process::id()))
            .join("eeprom.bin")
    }

    #[test]
    fn parses_operator_commands() {
        assert_eq!("+".parse::<OperatorCommand>(), Ok(OperatorCommand::Up));
        assert_eq!(" U ".parse::<OperatorCommand>(), Ok(OperatorCommand::Up));
        assert_eq!("-".parse::<OperatorCommand>(), Ok(OperatorCommand::Down));
        assert_eq!("b".parse::<OperatorCommand>(), Ok(OperatorCommand::Press));
        assert_eq!("x".parse::<OperatorCommand>(), Ok(OperatorCommand::Disconnect));
        assert_eq!("c".parse::<OperatorCommand>(), Ok(OperatorCommand::Reconnect));
        assert_eq!("quit".parse::<OperatorCommand>(), Ok(OperatorCommand::Quit));
        assert_eq!("".parse::<OperatorCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "heat".parse::<OperatorCommand>(),
            Err(CommandError::Unknown("heat".to_string()))
        );
    }

    #[test]
    fn thermal_model_heats_and_cools() {
        let panel = SimPanel::new(&ControlConfig::default());
        let mut sensor = panel
            .parts(FileEeprom {
                path: scratch_path("thermal"),
                image: EepromImage::erased(EEPROM_CAPACITY),
            })
            .sensor;

        panel.heater.store(true, Ordering::Relaxed);
        sensor.advance(60.0);
        let heated = sensor.temperature_c;
        assert!(heated > AMBIENT_C && heated < HEATER_EQUILIBRIUM_C);

        panel.heater.store(false, Ordering::Relaxed);
        sensor.advance(60.0);
        assert!(sensor.temperature_c < heated);
    }

    #[test]
    fn disconnected_sensor_reads_none() {
        let panel = SimPanel::new(&ControlConfig::default());
        let mut sensor = panel
            .parts(FileEeprom {
                path: scratch_path("disconnect"),
                image: EepromImage::erased(EEPROM_CAPACITY),
            })
            .sensor;

        assert!(sensor.sample().is_some());
        panel.connected.store(false, Ordering::Relaxed);
        assert_eq!(sensor.sample(), None);
    }

    #[tokio::test]
    async fn file_eeprom_survives_reopen() {
        let path = scratch_path("reopen");
        let _ = std::fs::remove_file(&path);

        let mut eeprom = FileEeprom::open(&path, EEPROM_CAPACITY).await.unwrap();
        let mut record = [0_u8; 4];
        eeprom.read(4, &mut record).unwrap();
        assert_eq!(record, [0xFF; 4]);

        eeprom.write(4, &41_i32.to_le_bytes()).unwrap();
        let mut reopened = FileEeprom::open(&path, EEPROM_CAPACITY).await.unwrap();
        reopened.read(4, &mut record).unwrap();
        assert_eq!(i32::from_le_bytes(record), 41);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panel_commands_drive_the_control_loop() {
        let path = scratch_path("panel");
        let _ = std::fs::remove_file(&path);
        let config = ControlConfig::default();
        let mut panel = SimPanel::new(&config);
        let eeprom = FileEeprom::open(&path, EEPROM_CAPACITY).await.unwrap();
        let (mut control, startup) = ControlLoop::start(panel.parts(eeprom), &config);
        assert_eq!(startup.setpoint, Setpoint::new(36));

        control.tick(0);
        panel.release_due(0);
        for (now, command) in [
            (5, OperatorCommand::Up),
            (10, OperatorCommand::Up),
            (15, OperatorCommand::Down),
        ] {
            panel.apply(command, now);
            control.tick(now);
            panel.release_due(now);
        }
        assert_eq!(control.setpoint(), Setpoint::new(37));

        panel.apply(OperatorCommand::Press, 20);
        let mut now = 20;
        while now < 20 + panel.manual_hold_ms + 10 {
            control.tick(now);
            panel.release_due(now);
            now += 5;
        }
        assert_eq!(control.heater_state(), HeaterState::Heating);
        assert!(panel.heater.load(Ordering::Relaxed));

        control.shutdown().unwrap();
        assert!(!panel.heater.load(Ordering::Relaxed));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn button_mode_holds_for_one_tick() {
        let config = ControlConfig {
            input_mode: InputMode::Buttons,
            ..ControlConfig::default()
        };
        let mut panel = SimPanel::new(&config);

        panel.apply(OperatorCommand::Down, 0);
        assert!(panel.phase_a.load(Ordering::Relaxed));
        assert!(!panel.phase_b.load(Ordering::Relaxed));

        panel.release_due(5);
        assert!(panel.phase_b.load(Ordering::Relaxed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commands_between_ticks_are_not_lost() {
        for input_mode in [InputMode::Encoder, InputMode::Buttons] {
            let path = scratch_path(&format!("queued-{input_mode:?}"));
            let _ = std::fs::remove_file(&path);
            let config = ControlConfig {
                input_mode,
                button_settle_ms: 0,
                ..ControlConfig::default()
            };
            let mut panel = SimPanel::new(&config);
            let eeprom = FileEeprom::open(&path, EEPROM_CAPACITY).await.unwrap();
            let (mut control, _) = ControlLoop::start(panel.parts(eeprom), &config);
            control.tick(0);
            panel.release_due(0);

            panel.apply(OperatorCommand::Up, 1);
            panel.apply(OperatorCommand::Up, 2);
            panel.apply(OperatorCommand::Down, 3);
            panel.apply(OperatorCommand::Up, 4);
            let mut now = 5;
            for _ in 0..6 {
                control.tick(now);
                panel.release_due(now);
                now += 5;
            }

            assert_eq!(control.setpoint(), Setpoint::new(38), "{input_mode:?}");
            let _ = std::fs::remove_file(&path);
        }
    }
}
