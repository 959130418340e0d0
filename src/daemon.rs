//! Kraken X61 control loop.
//!
//! The daemon owns one device session at a time and steps through
//! `Starting → Running ⇄ Reconnecting → ShuttingDown`. Each `Running`
//! iteration reloads the config if it changed, pushes the color (reading the
//! liquid temperature back), reads the CPU temperature, evaluates the curves
//! with hysteresis and pushes the new speeds. A failed push sends the loop to
//! `Reconnecting`, which releases the old session before opening a new one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConfigWatcher, DaemonConfig};
use crate::cooling::{ControlState, Duties};
use crate::device::{Connector, KrakenX61};
use crate::error::Result;
use crate::protocol::DeviceStatus;
use crate::utils::sensors::{TemperatureSource, millicelsius_to_celsius};
use crate::utils::status_file::{StatusFile, StatusRecord};

/// Pause between releasing a failed session and opening a new one.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Longest uninterrupted sleep; bounds how late a shutdown request is seen.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

// =============================================================================
// Shutdown
// =============================================================================

/// Cancellation flag shared between the signal handler and the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at its next safe point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel the token when `signal` arrives, replacing its default action.
    #[cfg(unix)]
    pub fn register_signal(&self, signal: i32) -> std::io::Result<()> {
        signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        Ok(())
    }

    /// Sleep for `duration` in short slices, waking early on cancellation.
    ///
    /// Returns true if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Where the control loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    Reconnecting,
    ShuttingDown,
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonState::Starting => write!(f, "Starting"),
            DaemonState::Running => write!(f, "Running"),
            DaemonState::Reconnecting => write!(f, "Reconnecting"),
            DaemonState::ShuttingDown => write!(f, "Shutting down"),
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub reconnects: u64,
    pub speed_changes: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} iterations, {} reconnects, {} speed changes",
            self.iterations, self.reconnects, self.speed_changes
        )
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// The control loop and everything it owns.
pub struct Daemon<C: Connector, S: TemperatureSource> {
    connector: C,
    sensor: S,
    watcher: ConfigWatcher,
    config: DaemonConfig,
    control: ControlState,
    /// `None` only while reconnecting.
    session: Option<KrakenX61<C::Transport>>,
    serial_number: String,
    status_file: StatusFile,
    state: DaemonState,
    shutdown: ShutdownToken,
    reconnect_backoff: Duration,
    summary: RunSummary,
}

impl<C: Connector, S: TemperatureSource> Daemon<C, S> {
    /// Open the first session, read the serial number and open the status file.
    ///
    /// # Arguments
    /// * `connector` - Opens transports on the Kraken
    /// * `sensor` - CPU temperature source
    /// * `watcher` - Tracks the config file the `config` was loaded from
    /// * `config` - The validated config
    /// * `shutdown` - Token the signal handler cancels
    ///
    /// # Errors
    /// Any failure here is fatal: no device, an incompatible device, no
    /// serial number, or an unwritable status file.
    pub fn start(
        mut connector: C,
        sensor: S,
        watcher: ConfigWatcher,
        config: DaemonConfig,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        debug!("State: {}", DaemonState::Starting);

        let session = open_session(&mut connector)?;
        let serial_number = session.serial_number()?;
        connector.pin(&serial_number);
        info!("Kraken X61 detected, serial number {}", serial_number);

        let status_file = StatusFile::create(&config.status_file)?;
        let control = ControlState::new(config.source, config.curves.clone());

        info!(
            "Config {}: source {}, color #{:06X}, interval {}ms",
            watcher.path().display(),
            config.source,
            config.main_color,
            config.interval.as_millis()
        );

        Ok(Self {
            connector,
            sensor,
            watcher,
            config,
            control,
            session: Some(session),
            serial_number,
            status_file,
            state: DaemonState::Running,
            shutdown,
            reconnect_backoff: RECONNECT_BACKOFF,
            summary: RunSummary::default(),
        })
    }

    /// Override the pause between releasing and reopening the device.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Run until the shutdown token is cancelled or a fatal error occurs.
    ///
    /// The session is released on every exit path.
    pub fn run(mut self) -> Result<RunSummary> {
        info!("Control loop running");

        let result = self.run_until_cancelled();

        self.state = DaemonState::ShuttingDown;
        drop(self.session.take());
        match &result {
            Ok(()) => info!("Control loop stopped: {}", self.summary),
            Err(e) => error!("Control loop failed: {} ({})", e, self.summary),
        }

        result.map(|()| self.summary)
    }

    fn run_until_cancelled(&mut self) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            self.step()?;
            if self.state == DaemonState::Running && !self.shutdown.sleep(self.config.interval) {
                break;
            }
        }
        Ok(())
    }

    /// Advance the state machine once: one iteration or one reconnect attempt.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            DaemonState::Running => self.iterate(),
            DaemonState::Reconnecting => self.reconnect(),
            DaemonState::Starting | DaemonState::ShuttingDown => Ok(()),
        }
    }

    // =========================================================================
    // Running
    // =========================================================================

    fn iterate(&mut self) -> Result<()> {
        self.summary.iterations += 1;

        if self.watcher.poll()? {
            self.reload_config()?;
        }

        let Some(session) = self.session.as_mut() else {
            self.state = DaemonState::Reconnecting;
            return Ok(());
        };

        session.set_color(self.config.main_color);
        let color_status = session.push_color();

        let cpu = match self.sensor.read_cpu_millicelsius() {
            Ok(milli) => Some(millicelsius_to_celsius(milli)),
            Err(e) => {
                warn!("CPU temperature unavailable: {}", e);
                None
            }
        };
        let liquid = color_status.map(|s| s.liquid_temp_c as i32);

        let (Some(cpu_c), Some(liquid_c)) = (cpu.or(liquid), liquid.or(cpu)) else {
            warn!("No temperature reading available, attempting reconnection...");
            self.state = DaemonState::Reconnecting;
            return Ok(());
        };

        let reading = self.control.select_reading(cpu_c, liquid_c);
        let duties = self.control.next_duties(reading);
        debug!(
            "Iteration {}: CPU {}°C, liquid {}°C, {} reading {}°C, target {}",
            self.summary.iterations,
            cpu_c,
            liquid_c,
            self.control.source(),
            reading,
            duties
        );

        session.set_fan_duty(duties.fan)?;
        session.set_pump_duty(duties.pump)?;
        let Some(status) = session.push_speeds() else {
            warn!("Bad update detected, attempting reconnection...");
            self.state = DaemonState::Reconnecting;
            return Ok(());
        };

        if self.control.record(duties) {
            self.summary.speed_changes += 1;
            self.publish(duties, &status, cpu_c, liquid_c);
        }

        Ok(())
    }

    fn publish(&mut self, duties: Duties, status: &DeviceStatus, cpu_c: i32, liquid_c: i32) {
        info!(
            "Changed fan speed to {}rpm, pump speed to {}rpm ({}), CPU {}°C, liquid {}°C",
            status.fan_rpm, status.pump_rpm, duties, cpu_c, liquid_c
        );

        let record = StatusRecord::new(&self.serial_number, status);
        if let Err(e) = self.status_file.write(&record) {
            warn!("Failed to update status file: {}", e);
        }
    }

    fn reload_config(&mut self) -> Result<()> {
        info!("Detected modifications to config file, updating preferences...");
        let config = DaemonConfig::load(self.watcher.path())?;

        if config.status_file != self.config.status_file {
            warn!(
                "status_file changed to {}; restart to apply",
                config.status_file.display()
            );
        }
        if config.cpu_temp_file != self.config.cpu_temp_file {
            warn!("cpu_temp_file changed; restart to apply");
        }

        self.control.reload(config.source, config.curves.clone());
        self.config = DaemonConfig {
            status_file: self.config.status_file.clone(),
            cpu_temp_file: self.config.cpu_temp_file.clone(),
            ..config
        };
        Ok(())
    }

    // =========================================================================
    // Reconnecting
    // =========================================================================

    fn reconnect(&mut self) -> Result<()> {
        // The old handle must be closed before the device is opened again.
        drop(self.session.take());

        if !self.shutdown.sleep(self.reconnect_backoff) {
            return Ok(());
        }

        match open_session(&mut self.connector) {
            Ok(session) => {
                self.session = Some(session);
                self.summary.reconnects += 1;
                self.state = DaemonState::Running;
                info!("Reconnected to Kraken X61 {}", self.serial_number);
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!("Reconnection failed: {}; retrying", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn open_session<C: Connector>(connector: &mut C) -> Result<KrakenX61<C::Transport>> {
    let transport = connector.connect()?;
    KrakenX61::open(transport)
}

impl<C: Connector, S: TemperatureSource> std::fmt::Debug for Daemon<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("state", &self.state)
            .field("serial_number", &self.serial_number)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::fs::File;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::SystemTime;

    use crate::error::KrakenError;
    use crate::device::transport::fake::{FAKE_SERIAL, FakeBus, FakeConnector, status_frame};
    use crate::protocol::{CMD_SET_FAN, CMD_SET_PUMP, CTRL_INIT};

    /// CPU temperature the test controls between steps.
    #[derive(Clone)]
    struct FakeSensor(Rc<Cell<Option<i64>>>);

    impl FakeSensor {
        fn celsius(c: i64) -> Self {
            FakeSensor(Rc::new(Cell::new(Some(c * 1000))))
        }

        fn set(&self, c: i64) {
            self.0.set(Some(c * 1000));
        }
    }

    impl TemperatureSource for FakeSensor {
        fn read_cpu_millicelsius(&mut self) -> Result<i64> {
            self.0
                .get()
                .ok_or_else(|| KrakenError::Sensor("unplugged".into()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        bus: Rc<RefCell<FakeBus>>,
        sensor: FakeSensor,
    }

    const CPU_CONFIG: &str = "\
temperature_source: cpu
fan_profile: [[30, 30], [60, 90]]
pump_profile: [[30, 60], [60, 100]]
interval: 10
";

    impl Fixture {
        fn new(config: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let status = dir.path().join("kraken.status");
            let text = format!("{}status_file: {}\n", config, status.display());
            std::fs::write(dir.path().join("daemon.yml"), text).unwrap();
            Fixture {
                dir,
                bus: FakeBus::new(),
                sensor: FakeSensor::celsius(30),
            }
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("daemon.yml")
        }

        fn status_text(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("kraken.status")).unwrap()
        }

        fn start(&self) -> Daemon<FakeConnector, FakeSensor> {
            let watcher = ConfigWatcher::new(self.config_path()).unwrap();
            let config = DaemonConfig::load(&self.config_path()).unwrap();
            Daemon::start(
                FakeConnector::new(&self.bus),
                self.sensor.clone(),
                watcher,
                config,
                ShutdownToken::new(),
            )
            .unwrap()
            .with_reconnect_backoff(Duration::ZERO)
        }

        /// Rewrite the config and push its modification time forward.
        fn rewrite_config(&self, config: &str) {
            let status = self.dir.path().join("kraken.status");
            let text = format!("{}status_file: {}\n", config, status.display());
            std::fs::write(self.config_path(), text).unwrap();
            touch(&self.config_path());
        }

        /// `(opcode, duty)` of every speed chunk sent so far.
        fn speed_writes(&self) -> Vec<(u8, u8)> {
            self.bus
                .borrow()
                .payloads()
                .iter()
                .filter(|p| p.len() == 2)
                .map(|p| (p[0], p[1]))
                .collect()
        }

        fn fan_duties(&self) -> Vec<u8> {
            self.speed_writes()
                .into_iter()
                .filter(|(op, _)| *op == CMD_SET_FAN)
                .map(|(_, duty)| duty)
                .collect()
        }
    }

    fn touch(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    #[test]
    fn test_start_pins_serial_and_runs() {
        let fixture = Fixture::new(CPU_CONFIG);
        let daemon = fixture.start();

        assert_eq!(daemon.state(), DaemonState::Running);
        assert_eq!(daemon.serial_number(), FAKE_SERIAL);
        assert_eq!(daemon.connector.pinned.as_deref(), Some(FAKE_SERIAL));
        assert_eq!(fixture.bus.borrow().control_values, vec![CTRL_INIT]);
    }

    #[test]
    fn test_iteration_pushes_speeds_and_status() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();

        daemon.step().unwrap();

        assert_eq!(
            fixture.speed_writes(),
            vec![(CMD_SET_PUMP, 60), (CMD_SET_FAN, 30)]
        );
        assert_eq!(
            fixture.status_text(),
            format!("{}\n1200\n2000\n30\n", FAKE_SERIAL)
        );
        assert_eq!(daemon.summary().speed_changes, 1);
    }

    #[test]
    fn test_status_only_written_on_change() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();

        daemon.step().unwrap();
        fixture.bus.borrow_mut().status_frame = status_frame(1500, 2200, 33);
        daemon.step().unwrap();

        assert!(fixture.status_text().contains("\n1200\n"));
        assert_eq!(daemon.summary().speed_changes, 1);

        fixture.sensor.set(60);
        daemon.step().unwrap();
        assert!(fixture.status_text().contains("\n1500\n2200\n33\n"));
        assert_eq!(daemon.summary().speed_changes, 2);
    }

    #[test]
    fn test_hysteresis_across_iterations() {
        let fixture = Fixture::new(CPU_CONFIG);
        fixture.sensor.set(60);
        let mut daemon = fixture.start();

        daemon.step().unwrap();
        fixture.sensor.set(20);
        for _ in 0..3 {
            daemon.step().unwrap();
        }

        assert_eq!(fixture.fan_duties(), vec![90, 85, 80, 75]);
    }

    #[test]
    fn test_failed_speed_push_reconnects() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();
        // Chunk 0 is the color frame, chunk 1 the pump command.
        fixture.bus.borrow_mut().fail_chunk = Some(1);

        daemon.step().unwrap();
        assert_eq!(daemon.state(), DaemonState::Reconnecting);

        daemon.step().unwrap();
        assert_eq!(daemon.state(), DaemonState::Running);
        assert_eq!(daemon.summary().reconnects, 1);

        let bus = fixture.bus.borrow();
        assert_eq!(bus.opens, 2);
        assert_eq!(bus.max_live, 1);
        assert_eq!(bus.live, 1);
        let inits = bus.control_values.iter().filter(|&&v| v == CTRL_INIT).count();
        assert_eq!(inits, 2);
    }

    #[test]
    fn test_reconnect_retries_until_device_returns() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();
        fixture.bus.borrow_mut().fail_chunk = Some(1);
        daemon.step().unwrap();

        fixture.bus.borrow_mut().failing_connects = 2;
        daemon.step().unwrap();
        assert_eq!(daemon.state(), DaemonState::Reconnecting);
        assert_eq!(fixture.bus.borrow().live, 0);
        daemon.step().unwrap();
        assert_eq!(daemon.state(), DaemonState::Reconnecting);
        daemon.step().unwrap();
        assert_eq!(daemon.state(), DaemonState::Running);

        assert_eq!(fixture.bus.borrow().max_live, 1);
    }

    #[test]
    fn test_incompatible_device_on_reconnect_is_fatal() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();
        fixture.bus.borrow_mut().fail_chunk = Some(1);
        daemon.step().unwrap();

        fixture.bus.borrow_mut().descriptor.product_id = 0x3008;
        let result = daemon.step();

        assert!(matches!(result, Err(KrakenError::Incompatible { .. })));
    }

    #[test]
    fn test_liquid_falls_back_to_cpu_when_color_push_fails() {
        let fixture = Fixture::new(
            "temperature_source: liquid\nfan_profile: [[30, 30], [60, 90]]\ninterval: 10\n",
        );
        fixture.sensor.set(60);
        let mut daemon = fixture.start();
        // Liquid reads 30°C, the color round trip fails so 60°C CPU is used.
        fixture.bus.borrow_mut().failing_reads = 1;

        daemon.step().unwrap();

        assert_eq!(daemon.state(), DaemonState::Running);
        assert_eq!(fixture.fan_duties(), vec![90]);
    }

    #[test]
    fn test_liquid_source_uses_device_reading() {
        let fixture = Fixture::new(
            "temperature_source: liquid\nfan_profile: [[30, 30], [60, 90]]\ninterval: 10\n",
        );
        fixture.sensor.set(60);
        let mut daemon = fixture.start();

        daemon.step().unwrap();

        assert_eq!(fixture.fan_duties(), vec![30]);
    }

    #[test]
    fn test_no_reading_at_all_reconnects() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();
        fixture.sensor.0.set(None);
        fixture.bus.borrow_mut().failing_reads = 1;

        daemon.step().unwrap();

        assert_eq!(daemon.state(), DaemonState::Reconnecting);
        assert!(fixture.speed_writes().is_empty());
    }

    #[test]
    fn test_config_reload_swaps_curves() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();
        daemon.step().unwrap();

        fixture.rewrite_config(
            "temperature_source: cpu\nfan_profile: [[30, 50]]\npump_profile: [[30, 70]]\ninterval: 10\n",
        );
        daemon.step().unwrap();

        assert_eq!(fixture.fan_duties(), vec![30, 50]);
    }

    #[test]
    fn test_invalid_reload_is_fatal() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();

        fixture.rewrite_config("temperature_source: cpu\nfan_profile: [[30, 33]]\n");

        assert!(matches!(
            daemon.step(),
            Err(KrakenError::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_vanished_config_is_fatal() {
        let fixture = Fixture::new(CPU_CONFIG);
        let mut daemon = fixture.start();

        std::fs::remove_file(fixture.config_path()).unwrap();

        assert!(matches!(daemon.step(), Err(KrakenError::Io { .. })));
    }

    #[test]
    fn test_run_stops_on_cancel_and_releases_session() {
        let fixture = Fixture::new(CPU_CONFIG);
        let daemon = fixture.start();
        let token = daemon.shutdown.clone();
        token.cancel();

        let summary = daemon.run().unwrap();

        assert_eq!(summary.iterations, 0);
        assert_eq!(fixture.bus.borrow().live, 0);
    }

    #[test]
    fn test_shutdown_sleep_wakes_early() {
        let token = ShutdownToken::new();
        assert!(token.sleep(Duration::from_millis(5)));

        token.cancel();
        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_quit_signal_cancels_token() {
        use signal_hook::consts::SIGQUIT;

        let token = ShutdownToken::new();
        token.register_signal(SIGQUIT).unwrap();
        assert!(!token.is_cancelled());

        signal_hook::low_level::raise(SIGQUIT).unwrap();
        assert!(token.is_cancelled());
    }
}
