//! Daemon configuration file.
//!
//! YAML by default, JSON when the file name ends in `.json`. The raw file
//! model is validated into a [`DaemonConfig`] holding ready-to-evaluate
//! curves; any invalid field is a configuration error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use serde::de::IgnoredAny;
use tracing::warn;

use crate::cooling::{Curve, CurveSet, TempSource};
use crate::error::{KrakenError, Result};
use crate::protocol::DEFAULT_COLOR;

// =============================================================================
// Config Paths
// =============================================================================

const APP_NAME: &str = "kraken-x61";
const CONFIG_FILE: &str = "daemon.yml";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/kraken-x61/daemon.yml";

/// Status sink used when the config names none.
pub const DEFAULT_STATUS_FILE: &str = "/tmp/kraken-x61.status";

/// Poll interval used when the config names none.
pub const DEFAULT_INTERVAL_MS: u64 = 500;

/// Per-user config location.
/// - Linux: ~/.config/kraken-x61/daemon.yml
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE))
}

/// Config path used when none is given on the command line.
///
/// The system path wins if it exists, then the per-user path. If neither
/// exists the system path is returned so the load error names it.
pub fn default_config_path() -> PathBuf {
    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return system;
    }
    match user_config_path() {
        Some(user) if user.exists() => user,
        _ => system,
    }
}

// =============================================================================
// File Model
// =============================================================================

/// Config file as written by the user.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    temperature_source: TempSource,
    fan_profile: Vec<Vec<i64>>,
    #[serde(default)]
    pump_profile: Option<Vec<Vec<i64>>>,
    #[serde(default)]
    main_color: Option<ColorValue>,
    /// Milliseconds.
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default = "default_status_file")]
    status_file: PathBuf,
    #[serde(default)]
    cpu_temp_file: Option<PathBuf>,
    /// Keys this daemon does not know; logged and ignored.
    #[serde(flatten)]
    unknown: BTreeMap<String, IgnoredAny>,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_status_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATUS_FILE)
}

/// `main_color` as either a plain integer or a `#RRGGBB` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ColorValue {
    Rgb(u32),
    Hex(String),
}

impl ColorValue {
    fn to_rgb(&self) -> Result<u32> {
        let rgb = match self {
            ColorValue::Rgb(rgb) => *rgb,
            ColorValue::Hex(hex) => parse_hex_color(hex)?,
        };
        if rgb > 0xFF_FF_FF {
            return Err(KrakenError::InvalidConfig(format!(
                "main_color {:#x} does not fit in 24 bits",
                rgb
            )));
        }
        Ok(rgb)
    }
}

/// Parse a hex color string into a `0xRRGGBB` value.
///
/// Accepts formats: `#RRGGBB`, `RRGGBB` or `0xRRGGBB`
///
/// # Example
/// ```
/// use kraken_x61_daemon::config::parse_hex_color;
///
/// assert_eq!(parse_hex_color("#FF5500").unwrap(), 0xFF5500);
/// ```
pub fn parse_hex_color(hex: &str) -> Result<u32> {
    let digits = hex
        .trim()
        .trim_start_matches('#')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if digits.len() != 6 {
        return Err(KrakenError::InvalidConfig(format!(
            "Invalid color hex: {}",
            hex
        )));
    }
    u32::from_str_radix(digits, 16)
        .map_err(|_| KrakenError::InvalidConfig(format!("Invalid color hex: {}", hex)))
}

// =============================================================================
// Validated Config
// =============================================================================

/// On-disk format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// JSON for `.json` files, YAML for everything else.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub source: TempSource,
    pub curves: CurveSet,
    pub main_color: u32,
    pub interval: Duration,
    pub status_file: PathBuf,
    /// Milli-°C file to read the CPU temperature from; `None` uses system sensors.
    pub cpu_temp_file: Option<PathBuf>,
}

impl DaemonConfig {
    /// Read and validate a config file.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `InvalidConfig` for malformed or
    /// missing fields, `InvalidProfile` for bad breakpoints.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| KrakenError::io(path, e))?;
        Self::parse(&text, ConfigFormat::from_path(path)).map_err(|e| match e {
            KrakenError::InvalidConfig(msg) => {
                KrakenError::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            KrakenError::InvalidProfile(msg) => {
                KrakenError::InvalidProfile(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse and validate config text.
    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        let file: ConfigFile = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|e| KrakenError::InvalidConfig(e.to_string()))?,
            ConfigFormat::Json => serde_json::from_str(text)
                .map_err(|e| KrakenError::InvalidConfig(e.to_string()))?,
        };
        Self::validate(file)
    }

    fn validate(file: ConfigFile) -> Result<Self> {
        for key in file.unknown.keys() {
            warn!("Ignoring unknown config key '{}'", key);
        }

        if file.interval == 0 {
            return Err(KrakenError::InvalidConfig(
                "interval must be greater than 0".into(),
            ));
        }

        let fan = Curve::from_pairs(&file.fan_profile)?;
        let pump = match &file.pump_profile {
            Some(pairs) => Curve::from_pairs(pairs)?,
            None => fan.clone(),
        };
        let main_color = match &file.main_color {
            Some(color) => color.to_rgb()?,
            None => DEFAULT_COLOR,
        };

        Ok(DaemonConfig {
            source: file.temperature_source,
            curves: CurveSet { fan, pump },
            main_color,
            interval: Duration::from_millis(file.interval),
            status_file: file.status_file,
            cpu_temp_file: file.cpu_temp_file,
        })
    }
}

// =============================================================================
// ConfigWatcher
// =============================================================================

/// Tracks a config file's modification time between loads.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    modified: SystemTime,
}

impl ConfigWatcher {
    /// Start watching `path`, recording its current modification time.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let modified = modified_time(&path)?;
        Ok(Self { path, modified })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file was modified since the last recorded time; the new
    /// time is recorded when it was.
    ///
    /// # Errors
    /// Returns `Io` if the file can no longer be stat'ed.
    pub fn poll(&mut self) -> Result<bool> {
        let modified = modified_time(&self.path)?;
        if modified > self.modified {
            self.modified = modified;
            return Ok(true);
        }
        Ok(false)
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| KrakenError::io(path, e))
}
