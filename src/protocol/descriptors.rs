//! USB descriptor parsing and validation for the Kraken X61.
//!
//! The X61 ships one hardware revision: one configuration, one
//! vendor-specific interface, two bulk endpoints. Anything else is
//! rejected as incompatible.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{KrakenError, Result};
use crate::protocol::commands::{CONFIGURATION_VALUE, KRAKEN_VID, KRAKEN_X61_PID};

/// Length of a standard device descriptor.
pub const DEVICE_DESCRIPTOR_LENGTH: usize = 18;

/// `bDescriptorType` of a device descriptor.
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;

/// Interface class code for vendor-specific interfaces.
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// Direction bit of `bEndpointAddress` (set = device-to-host).
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Fields of the device descriptor the session cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// `iSerialNumber`; 0 means the device has no serial string.
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Parse a raw 18-byte device descriptor.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < DEVICE_DESCRIPTOR_LENGTH || buf[1] != DESCRIPTOR_TYPE_DEVICE {
            return Err(KrakenError::Incompatible {
                message: format!("Malformed device descriptor ({} bytes)", buf.len()),
            });
        }

        Ok(DeviceDescriptor {
            vendor_id: LittleEndian::read_u16(&buf[8..10]),
            product_id: LittleEndian::read_u16(&buf[10..12]),
            serial_number_index: buf[16],
            num_configurations: buf[17],
        })
    }

    /// Assert this is the one supported Kraken X61 revision.
    pub fn validate(&self) -> Result<()> {
        if self.num_configurations != 1 {
            return Err(KrakenError::Incompatible {
                message: format!(
                    "Expected exactly one configuration, device reports {}",
                    self.num_configurations
                ),
            });
        }
        if self.vendor_id != KRAKEN_VID || self.product_id != KRAKEN_X61_PID {
            return Err(KrakenError::Incompatible {
                message: format!(
                    "Unexpected device {:04x}:{:04x}, expected {:04x}:{:04x}",
                    self.vendor_id, self.product_id, KRAKEN_VID, KRAKEN_X61_PID
                ),
            });
        }
        Ok(())
    }
}

/// One interface alternate setting as reported by the configuration descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceLayout {
    pub number: u8,
    pub class: u8,
    /// `bEndpointAddress` of every endpoint, in descriptor order.
    pub endpoints: Vec<u8>,
}

/// The device's configuration descriptor, reduced to what the session checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationLayout {
    pub value: u8,
    pub interfaces: Vec<InterfaceLayout>,
}

impl ConfigurationLayout {
    /// Check the configuration value and return the sole vendor-specific interface.
    pub fn main_interface(&self) -> Result<&InterfaceLayout> {
        if self.value != CONFIGURATION_VALUE {
            return Err(KrakenError::Incompatible {
                message: format!(
                    "bConfigurationValue must equal {}, got {}",
                    CONFIGURATION_VALUE, self.value
                ),
            });
        }

        let mut vendor = self
            .interfaces
            .iter()
            .filter(|i| i.class == CLASS_VENDOR_SPECIFIC);
        match (vendor.next(), vendor.next()) {
            (Some(interface), None) => Ok(interface),
            (None, _) => Err(KrakenError::Incompatible {
                message: "No vendor-specific interface".into(),
            }),
            (Some(_), Some(_)) => Err(KrakenError::Incompatible {
                message: "More than one vendor-specific interface".into(),
            }),
        }
    }
}

/// The bulk endpoint pair, classified by direction bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub input: u8,
    pub output: u8,
}

impl EndpointPair {
    /// Classify exactly two endpoint addresses into IN and OUT.
    ///
    /// Descriptor order is not assumed: the address with the direction bit
    /// set is the input endpoint, the other one the output endpoint.
    pub fn classify(addresses: &[u8]) -> Result<Self> {
        let &[first, second] = addresses else {
            return Err(KrakenError::Incompatible {
                message: format!("Expecting only 2 endpoints, found {}", addresses.len()),
            });
        };

        match (is_in(first), is_in(second)) {
            (true, false) => Ok(EndpointPair {
                input: first,
                output: second,
            }),
            (false, true) => Ok(EndpointPair {
                input: second,
                output: first,
            }),
            _ => Err(KrakenError::Incompatible {
                message: format!(
                    "Endpoints {:#04x} and {:#04x} are not one IN and one OUT",
                    first, second
                ),
            }),
        }
    }
}

fn is_in(address: u8) -> bool {
    address & ENDPOINT_DIR_IN == ENDPOINT_DIR_IN
}
