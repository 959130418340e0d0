//! NZXT Kraken X61 device session.
//!
//! High-level interface for pushing color and fan/pump duty cycles and
//! reading back live telemetry.

use tracing::{debug, warn};

use crate::device::transport::{UsbTransport, write_chunked};
use crate::error::{KrakenError, Result};
use crate::protocol::{
    CTRL_BEGIN_TRANSFER, CTRL_INIT, CTRL_REQUEST, Channel, ColorCommand, DeviceDescriptor,
    DeviceStatus, EndpointPair, STATUS_FRAME_LENGTH, SpeedCommand,
};

// =============================================================================
// KrakenX61
// =============================================================================

/// One open session on a Kraken X61.
///
/// Owns the device handle (through the transport), the negotiated endpoint
/// pair and the color/fan/pump command buffers. Dropping the session closes
/// the handle, so a replacement session can only be opened once this one is
/// gone.
///
/// # Example
///
/// ```no_run
/// use kraken_x61_daemon::device::{KrakenX61, usb};
///
/// let mut kraken = KrakenX61::open(usb::open_first()?)?;
/// println!("Serial: {}", kraken.serial_number()?);
///
/// kraken.set_color(0x00_80_FF);
/// kraken.set_fan_duty(50)?;
/// kraken.set_pump_duty(80)?;
///
/// if let Some(status) = kraken.push_speeds() {
///     println!("{}", status);
/// }
/// # Ok::<(), kraken_x61_daemon::error::KrakenError>(())
/// ```
pub struct KrakenX61<T: UsbTransport> {
    transport: T,
    descriptor: DeviceDescriptor,
    endpoints: EndpointPair,
    color: ColorCommand,
    fan: SpeedCommand,
    pump: SpeedCommand,
}

impl<T: UsbTransport> KrakenX61<T> {
    /// Validate the device and start a session on it.
    ///
    /// Checks the descriptor shape and identity, selects the only
    /// configuration, claims the vendor interface, classifies its two
    /// endpoints and sends the one-time init control value.
    ///
    /// # Errors
    /// Returns `Incompatible` if the device is not the supported revision,
    /// or a transfer error if the init control value is not accepted.
    pub fn open(mut transport: T) -> Result<Self> {
        let descriptor = transport.device_descriptor()?;
        descriptor.validate()?;

        let configuration = transport.configuration()?;
        let interface = configuration.main_interface()?.clone();
        let endpoints = EndpointPair::classify(&interface.endpoints)?;

        transport
            .set_configuration(configuration.value)
            .map_err(|e| KrakenError::Incompatible {
                message: format!(
                    "Failed to select configuration {}: {}",
                    configuration.value, e
                ),
            })?;
        transport.claim_interface(interface.number)?;

        transport.control_out(CTRL_REQUEST, CTRL_INIT)?;

        debug!(
            "Session opened: interface {}, IN {:#04x}, OUT {:#04x}",
            interface.number, endpoints.input, endpoints.output
        );

        Ok(Self {
            transport,
            descriptor,
            endpoints,
            color: ColorCommand::new(),
            fan: SpeedCommand::new(Channel::Fan),
            pump: SpeedCommand::new(Channel::Pump),
        })
    }

    /// Read the serial number string descriptor.
    ///
    /// # Errors
    /// Returns `MissingSerialNumber` if the device reports no serial string.
    pub fn serial_number(&self) -> Result<String> {
        match self.descriptor.serial_number_index {
            0 => Err(KrakenError::MissingSerialNumber),
            index => self.transport.read_string_descriptor(index),
        }
    }

    /// Set the fan duty cycle for the next speed push.
    ///
    /// # Errors
    /// Returns `InvalidDuty` unless `duty` is 30-100 and a multiple of 5.
    pub fn set_fan_duty(&mut self, duty: u8) -> Result<()> {
        self.fan.set_duty(duty)
    }

    /// Set the pump duty cycle for the next speed push.
    ///
    /// # Errors
    /// Returns `InvalidDuty` unless `duty` is 30-100 and a multiple of 5.
    pub fn set_pump_duty(&mut self, duty: u8) -> Result<()> {
        self.pump.set_duty(duty)
    }

    /// Set the main color (`0xRRGGBB`) for the next color push.
    pub fn set_color(&mut self, rgb: u32) {
        self.color.set_rgb(rgb);
    }

    pub fn fan_duty(&self) -> u8 {
        self.fan.duty()
    }

    pub fn pump_duty(&self) -> u8 {
        self.pump.duty()
    }

    pub fn endpoints(&self) -> EndpointPair {
        self.endpoints
    }

    /// Send the color frame and read back the device status.
    ///
    /// Returns `None` if any part of the round trip failed.
    pub fn push_color(&mut self) -> Option<DeviceStatus> {
        self.round_trip("color", |kraken| {
            let out = kraken.endpoints.output;
            write_chunked(&mut kraken.transport, out, kraken.color.as_bytes())
        })
    }

    /// Send the pump then the fan command and read back the device status.
    ///
    /// Returns `None` if any part of the round trip failed.
    pub fn push_speeds(&mut self) -> Option<DeviceStatus> {
        self.round_trip("speed", |kraken| {
            let out = kraken.endpoints.output;
            write_chunked(&mut kraken.transport, out, kraken.pump.as_bytes())?;
            write_chunked(&mut kraken.transport, out, kraken.fan.as_bytes())
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn round_trip<F>(&mut self, what: &str, send: F) -> Option<DeviceStatus>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        match self.try_round_trip(send) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Kraken {} update failed: {}", what, e);
                None
            }
        }
    }

    fn try_round_trip<F>(&mut self, send: F) -> Result<DeviceStatus>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.transport.control_out(CTRL_REQUEST, CTRL_BEGIN_TRANSFER)?;
        send(self)?;
        self.receive_status()
    }

    fn receive_status(&mut self) -> Result<DeviceStatus> {
        let frame = self
            .transport
            .bulk_in(self.endpoints.input, STATUS_FRAME_LENGTH)?;
        DeviceStatus::parse(&frame)
    }
}

impl<T: UsbTransport> Drop for KrakenX61<T> {
    fn drop(&mut self) {
        debug!("Releasing Kraken X61 session");
    }
}

impl<T: UsbTransport> std::fmt::Debug for KrakenX61<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenX61")
            .field("endpoints", &self.endpoints)
            .field("color", &format_args!("{:06X}", self.color.rgb()))
            .field("fan", &self.fan.duty())
            .field("pump", &self.pump.duty())
            .finish_non_exhaustive()
    }
}
