//! Device status parsing for the Kraken X61.
//!
//! Every color or speed push is answered with a 32-byte status frame.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{KrakenError, Result};
use crate::protocol::commands::STATUS_FRAME_LENGTH;

// =============================================================================
// Response Parsing Offsets
// =============================================================================

/// Offset of the fan RPM (big-endian u16).
const OFFSET_FAN_RPM: usize = 0;
/// Offset of the pump RPM (big-endian u16).
const OFFSET_PUMP_RPM: usize = 8;
/// Offset of the liquid temperature in whole degrees Celsius.
const OFFSET_LIQUID_TEMP: usize = 10;

// =============================================================================
// Status Structures
// =============================================================================

/// Telemetry decoded from one status frame.
///
/// A successful round trip always yields a fully populated value, so a
/// reading of 0 RPM is a real reading and never a failure marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Fan speed in RPM.
    pub fan_rpm: u16,
    /// Pump speed in RPM.
    pub pump_rpm: u16,
    /// Liquid coolant temperature in Celsius.
    pub liquid_temp_c: u8,
}

impl DeviceStatus {
    /// Parse a status frame read from the IN endpoint.
    ///
    /// # Errors
    /// Returns `Transfer` if fewer than 32 bytes were received.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < STATUS_FRAME_LENGTH {
            return Err(KrakenError::Transfer {
                message: format!(
                    "Status frame too short: {} bytes, expected {}",
                    buf.len(),
                    STATUS_FRAME_LENGTH
                ),
            });
        }

        Ok(DeviceStatus {
            fan_rpm: BigEndian::read_u16(&buf[OFFSET_FAN_RPM..]),
            pump_rpm: BigEndian::read_u16(&buf[OFFSET_PUMP_RPM..]),
            liquid_temp_c: buf[OFFSET_LIQUID_TEMP],
        })
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "+-----------------------------------+")?;
        writeln!(f, "|      NZXT Kraken X61 Status       |")?;
        writeln!(f, "+-----------------------------------+")?;
        writeln!(f, "|  Liquid Temp:      {:>3} C          |", self.liquid_temp_c)?;
        writeln!(f, "|  Pump Speed:    {:>5} RPM         |", self.pump_rpm)?;
        writeln!(f, "|  Fan Speed:     {:>5} RPM         |", self.fan_rpm)?;
        writeln!(f, "+-----------------------------------+")?;
        Ok(())
    }
}
