//! Custom error types for the Kraken X61 daemon.
//!
//! Errors are split the way the daemon reacts to them: compatibility and
//! configuration errors stop the process, transfer errors trigger a reconnect.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Kraken device and daemon operations.
#[derive(Error, Debug)]
pub enum KrakenError {
    /// Device not found during enumeration.
    #[error("Kraken X61 not found. Check USB connection and permissions.")]
    DeviceNotFound,

    /// USB library error (open, claim, descriptor read).
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    /// Device does not look like the single supported hardware revision.
    #[error("Incompatible device: {message}")]
    Incompatible { message: String },

    /// A control or bulk transfer failed or was short.
    #[error("Transfer failed: {message}")]
    Transfer { message: String },

    /// Duty cycle outside 30-100 or not a multiple of 5.
    #[error("Invalid duty cycle {value}% for {channel}. Valid: 30%-100% in steps of 5")]
    InvalidDuty { channel: String, value: u8 },

    /// Fan/pump breakpoint list is malformed.
    #[error("Invalid speed profile: {0}")]
    InvalidProfile(String),

    /// Config file is missing a field or has an unusable value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem error tied to a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Temperature sensor could not be read.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Device descriptor reports no serial number string.
    #[error("Device reports no serial number string descriptor")]
    MissingSerialNumber,
}

impl KrakenError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KrakenError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors the control loop recovers from by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KrakenError::DeviceNotFound | KrakenError::Transfer { .. } | KrakenError::Usb(_)
        )
    }
}

/// Result type alias for Kraken operations.
pub type Result<T> = std::result::Result<T, KrakenError>;
