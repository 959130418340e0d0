//! CPU temperature sources.
//!
//! The daemon reads the CPU temperature either from a sysfs-style file
//! holding millidegrees Celsius, or through `sysinfo` component sensors when
//! no such file is configured.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sysinfo::Components;

use crate::error::{KrakenError, Result};

/// Source of the CPU temperature in millidegrees Celsius.
pub trait TemperatureSource {
    fn read_cpu_millicelsius(&mut self) -> Result<i64>;
}

/// Whole degrees from millidegrees, truncating toward zero.
pub fn millicelsius_to_celsius(milli: i64) -> i32 {
    (milli / 1000) as i32
}

// =============================================================================
// Sysfs File
// =============================================================================

/// A file such as `/sys/class/hwmon/hwmon0/temp1_input`, kept open and
/// re-read from the start on every call.
#[derive(Debug)]
pub struct SysfsCpuTemp {
    path: PathBuf,
    file: File,
}

impl SysfsCpuTemp {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| KrakenError::io(&path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSource for SysfsCpuTemp {
    fn read_cpu_millicelsius(&mut self) -> Result<i64> {
        let mut text = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut text))
            .map_err(|e| KrakenError::io(&self.path, e))?;

        text.trim().parse().map_err(|_| {
            KrakenError::Sensor(format!(
                "{} does not hold an integer: {:?}",
                self.path.display(),
                text.trim()
            ))
        })
    }
}

// =============================================================================
// System Sensors
// =============================================================================

/// Wrapper for `sysinfo` component sensors.
pub struct SystemSensors {
    components: Components,
}

impl SystemSensors {
    /// Create a new SystemSensors instance with refreshed sensor list.
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }

    /// Refresh all sensor values.
    pub fn refresh(&mut self) {
        self.components.refresh(true);
    }

    /// Find CPU temperature using common sensor label patterns.
    ///
    /// Searches for sensors with labels containing:
    /// - "cpu", "package", "core", "tdie"
    ///
    /// Returns the label and temperature of the first matching sensor.
    pub fn find_cpu_temp(&self) -> Option<(String, f32)> {
        self.components
            .iter()
            .find(|c| is_cpu_label(c.label()))
            .and_then(|c| c.temperature().map(|t| (c.label().to_string(), t)))
    }
}

impl Default for SystemSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSource for SystemSensors {
    fn read_cpu_millicelsius(&mut self) -> Result<i64> {
        self.refresh();
        self.find_cpu_temp()
            .map(|(_, celsius)| (celsius * 1000.0) as i64)
            .ok_or_else(|| KrakenError::Sensor("No CPU temperature sensor found".into()))
    }
}

fn is_cpu_label(label: &str) -> bool {
    let label = label.to_lowercase();
    ["cpu", "package", "core", "tdie"]
        .iter()
        .any(|pattern| label.contains(pattern))
}

// =============================================================================
// Configured Source
// =============================================================================

/// The CPU temperature source selected by the config.
pub enum CpuSensor {
    File(SysfsCpuTemp),
    System(SystemSensors),
}

impl CpuSensor {
    /// Open the configured file, or fall back to system sensors.
    pub fn from_config(cpu_temp_file: Option<&Path>) -> Result<Self> {
        match cpu_temp_file {
            Some(path) => Ok(CpuSensor::File(SysfsCpuTemp::open(path)?)),
            None => Ok(CpuSensor::System(SystemSensors::new())),
        }
    }
}

impl TemperatureSource for CpuSensor {
    fn read_cpu_millicelsius(&mut self) -> Result<i64> {
        match self {
            CpuSensor::File(file) => file.read_cpu_millicelsius(),
            CpuSensor::System(sensors) => sensors.read_cpu_millicelsius(),
        }
    }
}

impl std::fmt::Debug for CpuSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuSensor::File(file) => write!(f, "CpuSensor::File({})", file.path().display()),
            CpuSensor::System(_) => write!(f, "CpuSensor::System"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
