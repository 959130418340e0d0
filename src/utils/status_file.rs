//! Plain-text status sink read by desktop widgets.
//!
//! The file holds exactly four lines, overwritten in place on each update:
//! serial number, fan RPM, pump RPM, water temperature (°C).

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{KrakenError, Result};
use crate::protocol::DeviceStatus;

/// One snapshot written to the status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub serial_number: String,
    pub fan_rpm: u16,
    pub pump_rpm: u16,
    pub liquid_temp_c: u8,
}

impl StatusRecord {
    pub fn new(serial_number: &str, status: &DeviceStatus) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            fan_rpm: status.fan_rpm,
            pump_rpm: status.pump_rpm,
            liquid_temp_c: status.liquid_temp_c,
        }
    }
}

impl std::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.serial_number)?;
        writeln!(f, "{}", self.fan_rpm)?;
        writeln!(f, "{}", self.pump_rpm)?;
        writeln!(f, "{}", self.liquid_temp_c)
    }
}

/// Open handle on the status file.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    file: File,
}

impl StatusFile {
    /// Create (or truncate) the status file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| KrakenError::io(&path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `record`.
    pub fn write(&mut self, record: &StatusRecord) -> Result<()> {
        let text = record.to_string();
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(text.as_bytes()))
            .and_then(|_| self.file.flush())
            .map_err(|e| KrakenError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fan_rpm: u16, liquid_temp_c: u8) -> StatusRecord {
        StatusRecord {
            serial_number: "X61-0001".into(),
            fan_rpm,
            pump_rpm: 2100,
            liquid_temp_c,
        }
    }

    #[test]
    fn test_writes_four_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kraken.status");
        let mut status = StatusFile::create(&path).unwrap();

        status.write(&record(1200, 31)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "X61-0001\n1200\n2100\n31\n");
    }

    #[test]
    fn test_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kraken.status");
        let mut status = StatusFile::create(&path).unwrap();

        status.write(&record(12000, 31)).unwrap();
        status.write(&record(900, 29)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "X61-0001\n900\n2100\n29\n");
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_create_fails_in_missing_dir() {
        let result = StatusFile::create("/nonexistent/dir/kraken.status");
        assert!(matches!(result, Err(KrakenError::Io { .. })));
    }

    #[test]
    fn test_record_from_status() {
        let status = DeviceStatus {
            fan_rpm: 300,
            pump_rpm: 200,
            liquid_temp_c: 27,
        };
        let record = StatusRecord::new("SN", &status);
        assert_eq!(record.to_string(), "SN\n300\n200\n27\n");
    }
}
