//! Command definitions and builders for the Kraken X61.
//!
//! The X61 speaks a vendor-specific protocol on one bulk OUT / bulk IN
//! endpoint pair. Every push is preceded by a vendor control transfer that
//! carries a single 16-bit value and no payload.

use crate::error::{KrakenError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Asetek (OEM) Vendor ID used by the Kraken X61.
pub const KRAKEN_VID: u16 = 0x2433;

/// Kraken X61 Product ID.
pub const KRAKEN_X61_PID: u16 = 0xB200;

/// `bConfigurationValue` of the only configuration the device exposes.
pub const CONFIGURATION_VALUE: u8 = 1;

/// Largest payload submitted in a single bulk transfer call.
pub const MAX_BULK_CHUNK: usize = 64;

/// Length of the status frame read back after every push.
pub const STATUS_FRAME_LENGTH: usize = 32;

/// Length of the color command frame.
pub const COLOR_COMMAND_LENGTH: usize = 19;

/// Minimum duty cycle accepted for fan and pump.
pub const MIN_DUTY: u8 = 30;

/// Maximum duty cycle accepted for fan and pump.
pub const MAX_DUTY: u8 = 100;

/// Duty cycles must be a multiple of this step.
pub const DUTY_STEP: u8 = 5;

// =============================================================================
// Opcodes and Control Values
// =============================================================================

/// Set color opcode (first byte of the color frame).
pub const CMD_SET_COLOR: u8 = 0x10;

/// Set fan duty opcode.
pub const CMD_SET_FAN: u8 = 0x12;

/// Set pump duty opcode.
pub const CMD_SET_PUMP: u8 = 0x13;

/// Vendor request number used for both control values.
pub const CTRL_REQUEST: u8 = 0x02;

/// Control value sent once when a session is opened.
pub const CTRL_INIT: u16 = 0x0002;

/// Control value sent right before every color or speed push.
pub const CTRL_BEGIN_TRANSFER: u16 = 0x0001;

/// Default color frame. Only bytes 1..=3 (RGB) are ever rewritten.
///
/// Bytes 4..=6 hold the alternate color, 7..=9 constant device defaults,
/// 10 the interval, 11..=15 interval/enable/alternate/blink flags.
pub const DEFAULT_COLOR_FRAME: [u8; COLOR_COMMAND_LENGTH] = [
    CMD_SET_COLOR,
    0xFF,
    0xFF,
    0xFF,
    0x00,
    0x00,
    0x00,
    0xFF,
    0x00,
    0x00,
    0x3C,
    0x01,
    0x01,
    0x01,
    0x00,
    0x00,
    0x01,
    0x00,
    0x01,
];

/// Main color applied when the config names none.
pub const DEFAULT_COLOR: u32 = 0xFF_00_00;

/// Offset of the red byte inside the color frame.
const COLOR_RGB_OFFSET: usize = 1;

// =============================================================================
// Speed Channels
// =============================================================================

/// Speed control channel identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Fan,
    Pump,
}

impl Channel {
    /// Opcode that prefixes this channel's speed command.
    pub const fn opcode(&self) -> u8 {
        match self {
            Channel::Fan => CMD_SET_FAN,
            Channel::Pump => CMD_SET_PUMP,
        }
    }

    /// Validate a duty cycle value for this channel.
    ///
    /// Both channels accept 30-100% in steps of 5.
    pub fn validate_duty(&self, duty: u8) -> Result<u8> {
        if !(MIN_DUTY..=MAX_DUTY).contains(&duty) || duty % DUTY_STEP != 0 {
            return Err(KrakenError::InvalidDuty {
                channel: self.to_string(),
                value: duty,
            });
        }
        Ok(duty)
    }
}

impl std::str::FromStr for Channel {
    type Err = KrakenError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "fan" => Ok(Channel::Fan),
            "pump" => Ok(Channel::Pump),
            _ => Err(KrakenError::InvalidConfig(format!(
                "Unknown channel '{}'. Use: fan or pump",
                name
            ))),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Fan => write!(f, "Fan"),
            Channel::Pump => write!(f, "Pump"),
        }
    }
}

// =============================================================================
// Command Buffers
// =============================================================================

/// 19-byte color command. Opcode and reserved bytes never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorCommand {
    frame: [u8; COLOR_COMMAND_LENGTH],
}

impl ColorCommand {
    pub fn new() -> Self {
        Self {
            frame: DEFAULT_COLOR_FRAME,
        }
    }

    /// Set the main color from a 24-bit `0xRRGGBB` value.
    pub fn set_rgb(&mut self, rgb: u32) {
        let [_, r, g, b] = rgb.to_be_bytes();
        self.frame[COLOR_RGB_OFFSET..COLOR_RGB_OFFSET + 3].copy_from_slice(&[r, g, b]);
    }

    /// Current main color as `0xRRGGBB`.
    pub fn rgb(&self) -> u32 {
        let rgb = &self.frame[COLOR_RGB_OFFSET..COLOR_RGB_OFFSET + 3];
        u32::from_be_bytes([0, rgb[0], rgb[1], rgb[2]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }
}

impl Default for ColorCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// 2-byte speed command: `[opcode, duty]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedCommand {
    channel: Channel,
    frame: [u8; 2],
}

impl SpeedCommand {
    /// New command at the minimum duty.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            frame: [channel.opcode(), MIN_DUTY],
        }
    }

    /// Set the duty cycle.
    ///
    /// # Errors
    /// Returns `InvalidDuty` if the value is outside 30-100 or not a multiple of 5.
    /// The buffer is left untouched in that case.
    pub fn set_duty(&mut self, duty: u8) -> Result<()> {
        self.frame[1] = self.channel.validate_duty(duty)?;
        Ok(())
    }

    pub fn duty(&self) -> u8 {
        self.frame[1]
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }
}
