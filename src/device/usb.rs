//! `nusb`-backed transport for the Kraken X61.
//!
//! Descriptors and control transfers use `nusb`'s blocking calls. Bulk
//! transfers are futures in `nusb`, so each call is driven on a
//! current-thread `tokio` runtime under a timeout; a timed-out transfer is
//! cancelled when its future is dropped.

use std::time::Duration;

use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer, TransferError};
use nusb::{Device, DeviceInfo, Interface};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::device::transport::{Connector, UsbTransport};
use crate::error::{KrakenError, Result};
use crate::protocol::descriptors::DESCRIPTOR_TYPE_DEVICE;
use crate::protocol::{
    ConfigurationLayout, DeviceDescriptor, InterfaceLayout, KRAKEN_VID, KRAKEN_X61_PID,
};

/// Per-call timeout for every control and bulk transfer.
pub const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// US English, the only language the X61 reports.
const LANGUAGE_EN_US: u16 = 0x0409;

// =============================================================================
// Discovery
// =============================================================================

/// A Kraken X61 seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub serial_number: Option<String>,
}

fn is_kraken(info: &DeviceInfo) -> bool {
    info.vendor_id() == KRAKEN_VID && info.product_id() == KRAKEN_X61_PID
}

/// Find the first attached Kraken X61, optionally matching a serial number.
///
/// # Errors
/// Returns `DeviceNotFound` if no matching device is attached.
pub fn find_device(serial: Option<&str>) -> Result<DeviceInfo> {
    nusb::list_devices()?
        .filter(is_kraken)
        .find(|info| serial.is_none() || info.serial_number() == serial)
        .ok_or(KrakenError::DeviceNotFound)
}

/// List all attached Kraken X61 devices.
pub fn list_devices() -> Result<Vec<DeviceSummary>> {
    let devices = nusb::list_devices()?
        .filter(is_kraken)
        .map(|info| DeviceSummary {
            bus: info.bus_number(),
            address: info.device_address(),
            serial_number: info.serial_number().map(String::from),
        })
        .collect();

    Ok(devices)
}

/// Open a transport on the first attached Kraken X61.
pub fn open_first() -> Result<NusbTransport> {
    NusbTransport::open(&find_device(None)?)
}

// =============================================================================
// NusbTransport
// =============================================================================

/// Open device handle plus the claimed interface once the session claims it.
pub struct NusbTransport {
    device: Device,
    interface: Option<Interface>,
    runtime: Runtime,
}

impl NusbTransport {
    /// Open a handle on the given device.
    pub fn open(info: &DeviceInfo) -> Result<Self> {
        let device = info.open()?;
        let runtime = Builder::new_current_thread().enable_time().build()?;

        debug!(
            "Opened USB device {:03}:{:03}",
            info.bus_number(),
            info.device_address()
        );

        Ok(Self {
            device,
            interface: None,
            runtime,
        })
    }

    fn interface(&self) -> Result<&Interface> {
        self.interface.as_ref().ok_or_else(|| KrakenError::Transfer {
            message: "Interface not claimed".into(),
        })
    }
}

fn transfer_error(what: &str, endpoint: u8, e: TransferError) -> KrakenError {
    KrakenError::Transfer {
        message: format!("{} on {:#04x}: {}", what, endpoint, e),
    }
}

fn timeout_error(what: &str, endpoint: u8) -> KrakenError {
    KrakenError::Transfer {
        message: format!(
            "{} on {:#04x} timed out after {}ms",
            what,
            endpoint,
            USB_TIMEOUT.as_millis()
        ),
    }
}

impl UsbTransport for NusbTransport {
    fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        let raw = self
            .device
            .get_descriptor(DESCRIPTOR_TYPE_DEVICE, 0, 0, USB_TIMEOUT)?;
        DeviceDescriptor::parse(&raw)
    }

    fn configuration(&self) -> Result<ConfigurationLayout> {
        let config = self
            .device
            .configurations()
            .next()
            .ok_or_else(|| KrakenError::Incompatible {
                message: "Device reports no configuration descriptor".into(),
            })?;

        let interfaces = config
            .interface_alt_settings()
            .filter(|alt| alt.alternate_setting() == 0)
            .map(|alt| InterfaceLayout {
                number: alt.interface_number(),
                class: alt.class(),
                endpoints: alt.endpoints().map(|ep| ep.address()).collect(),
            })
            .collect();

        Ok(ConfigurationLayout {
            value: config.configuration_value(),
            interfaces,
        })
    }

    fn set_configuration(&mut self, value: u8) -> Result<()> {
        self.device.set_configuration(value)?;
        Ok(())
    }

    fn claim_interface(&mut self, number: u8) -> Result<()> {
        self.interface = Some(self.device.claim_interface(number)?);
        Ok(())
    }

    fn read_string_descriptor(&self, index: u8) -> Result<String> {
        let index = string_index(index)?;
        let value = self
            .device
            .get_string_descriptor(index, LANGUAGE_EN_US, USB_TIMEOUT)?;
        Ok(value)
    }

    fn control_out(&mut self, request: u8, value: u16) -> Result<()> {
        let control = Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index: 0,
        };

        self.interface()?
            .control_out_blocking(control, &[], USB_TIMEOUT)
            .map_err(|e| transfer_error("Control transfer", 0x00, e))?;
        Ok(())
    }

    fn bulk_out(&mut self, endpoint: u8, chunk: &[u8]) -> Result<usize> {
        let interface = self.interface()?;
        let completion = self
            .runtime
            .block_on(async {
                let transfer = interface.bulk_out(endpoint, chunk.to_vec());
                tokio::time::timeout(USB_TIMEOUT, transfer).await
            })
            .map_err(|_| timeout_error("Bulk write", endpoint))?;

        completion
            .status
            .map_err(|e| transfer_error("Bulk write", endpoint, e))?;
        Ok(completion.data.actual_length())
    }

    fn bulk_in(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>> {
        let interface = self.interface()?;
        let completion = self
            .runtime
            .block_on(async {
                let transfer = interface.bulk_in(endpoint, RequestBuffer::new(len));
                tokio::time::timeout(USB_TIMEOUT, transfer).await
            })
            .map_err(|_| timeout_error("Bulk read", endpoint))?;

        completion
            .status
            .map_err(|e| transfer_error("Bulk read", endpoint, e))?;
        Ok(completion.data)
    }
}

/// Index 0 means the device has no such string.
fn string_index(index: u8) -> Result<u8> {
    match index {
        0 => Err(KrakenError::MissingSerialNumber),
        index => Ok(index),
    }
}

// =============================================================================
// UsbConnector
// =============================================================================

/// Reopens the same physical Kraken, identified by serial number once known.
#[derive(Debug, Clone, Default)]
pub struct UsbConnector {
    serial: Option<String>,
}

impl UsbConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for UsbConnector {
    type Transport = NusbTransport;

    fn connect(&mut self) -> Result<NusbTransport> {
        let info = find_device(self.serial.as_deref())?;
        NusbTransport::open(&info)
    }

    fn pin(&mut self, serial: &str) {
        self.serial = Some(serial.to_string());
    }
}

impl std::fmt::Debug for NusbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NusbTransport")
            .field("claimed", &self.interface.is_some())
            .finish_non_exhaustive()
    }
}
