//! Transport seam between the Kraken protocol and the USB library.
//!
//! `KrakenX61` only talks to a `UsbTransport`. The real implementation lives
//! in `device::usb`; tests drive the protocol through an in-memory fake.

use tracing::trace;

use crate::error::{KrakenError, Result};
use crate::protocol::{ConfigurationLayout, DeviceDescriptor, MAX_BULK_CHUNK};

/// Blocking USB primitives needed by one Kraken session.
///
/// Every transfer is bounded by the implementation's per-call timeout.
/// Dropping the transport releases the device handle.
pub trait UsbTransport {
    /// Read and parse the device descriptor.
    fn device_descriptor(&self) -> Result<DeviceDescriptor>;

    /// Layout of the first (and only) configuration descriptor.
    fn configuration(&self) -> Result<ConfigurationLayout>;

    /// Select the configuration with the given `bConfigurationValue`.
    fn set_configuration(&mut self, value: u8) -> Result<()>;

    /// Claim the interface all later transfers go through.
    fn claim_interface(&mut self, number: u8) -> Result<()>;

    /// Read an ASCII string descriptor.
    fn read_string_descriptor(&self, index: u8) -> Result<String>;

    /// Vendor control transfer, host-to-device, carrying only `value`.
    fn control_out(&mut self, request: u8, value: u16) -> Result<()>;

    /// Submit one bulk OUT transfer. Returns the number of bytes sent.
    fn bulk_out(&mut self, endpoint: u8, chunk: &[u8]) -> Result<usize>;

    /// Submit one bulk IN transfer of up to `len` bytes.
    fn bulk_in(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>>;
}

/// Opens fresh transports on the same physical device.
///
/// Used at startup and whenever the control loop reconnects.
pub trait Connector {
    type Transport: UsbTransport;

    fn connect(&mut self) -> Result<Self::Transport>;

    /// Remember the serial number of the device the first session landed on,
    /// so reconnects go back to the same unit.
    fn pin(&mut self, _serial: &str) {}
}

/// Write `data` to `endpoint` in chunks of at most 64 bytes.
///
/// Stops at the first failed or short chunk; the whole write then fails and
/// no further chunks are submitted.
pub fn write_chunked<T: UsbTransport + ?Sized>(
    transport: &mut T,
    endpoint: u8,
    data: &[u8],
) -> Result<()> {
    let mut sent = 0;

    for chunk in data.chunks(MAX_BULK_CHUNK) {
        let written = transport.bulk_out(endpoint, chunk)?;
        if written != chunk.len() {
            return Err(KrakenError::Transfer {
                message: format!(
                    "Short bulk write on {:#04x}: {} of {} bytes (after {} of {})",
                    endpoint,
                    written,
                    chunk.len(),
                    sent,
                    data.len()
                ),
            });
        }
        sent += written;
        trace!("Sent {} bytes to {:#04x}", written, endpoint);
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory Kraken X61 used by protocol and daemon tests.

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Connector, UsbTransport};
    use crate::error::{KrakenError, Result};
    use crate::protocol::descriptors::CLASS_VENDOR_SPECIFIC;
    use crate::protocol::{
        ConfigurationLayout, DeviceDescriptor, InterfaceLayout, KRAKEN_VID, KRAKEN_X61_PID,
        STATUS_FRAME_LENGTH,
    };

    pub const FAKE_SERIAL: &str = "X61-FAKE-0001";
    pub const FAKE_OUT: u8 = 0x02;
    pub const FAKE_IN: u8 = 0x81;

    /// Shared state of the fake bus, inspected by tests after the fact.
    #[derive(Debug)]
    pub struct FakeBus {
        pub descriptor: DeviceDescriptor,
        pub configuration: ConfigurationLayout,
        pub status_frame: Vec<u8>,
        pub selected_configuration: Option<u8>,
        pub control_values: Vec<u16>,
        /// Every bulk OUT chunk as `(endpoint, bytes)`.
        pub chunks: Vec<(u8, Vec<u8>)>,
        /// Fail the bulk OUT call with this zero-based index (counted over the bus lifetime).
        pub fail_chunk: Option<usize>,
        /// Number of upcoming status reads that fail.
        pub failing_reads: usize,
        /// Number of upcoming `connect` calls that fail.
        pub failing_connects: usize,
        pub bulk_out_calls: usize,
        pub opens: usize,
        pub live: usize,
        pub max_live: usize,
    }

    impl FakeBus {
        pub fn new() -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(FakeBus {
                descriptor: DeviceDescriptor {
                    vendor_id: KRAKEN_VID,
                    product_id: KRAKEN_X61_PID,
                    serial_number_index: 3,
                    num_configurations: 1,
                },
                configuration: ConfigurationLayout {
                    value: 1,
                    interfaces: vec![InterfaceLayout {
                        number: 0,
                        class: CLASS_VENDOR_SPECIFIC,
                        endpoints: vec![FAKE_OUT, FAKE_IN],
                    }],
                },
                status_frame: status_frame(1200, 2000, 30),
                selected_configuration: None,
                control_values: Vec::new(),
                chunks: Vec::new(),
                fail_chunk: None,
                failing_reads: 0,
                failing_connects: 0,
                bulk_out_calls: 0,
                opens: 0,
                live: 0,
                max_live: 0,
            }))
        }

        /// Open a new handle on the fake device.
        pub fn connect(bus: &Rc<RefCell<Self>>) -> Result<FakeTransport> {
            let mut state = bus.borrow_mut();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(KrakenError::DeviceNotFound);
            }
            state.opens += 1;
            state.live += 1;
            state.max_live = state.max_live.max(state.live);
            Ok(FakeTransport { bus: bus.clone() })
        }

        /// Payloads written to the OUT endpoint, one entry per chunk.
        pub fn payloads(&self) -> Vec<Vec<u8>> {
            self.chunks.iter().map(|(_, bytes)| bytes.clone()).collect()
        }
    }

    /// Build a status frame with the given readings.
    pub fn status_frame(fan_rpm: u16, pump_rpm: u16, liquid: u8) -> Vec<u8> {
        let mut frame = vec![0u8; STATUS_FRAME_LENGTH];
        frame[0..2].copy_from_slice(&fan_rpm.to_be_bytes());
        frame[8..10].copy_from_slice(&pump_rpm.to_be_bytes());
        frame[10] = liquid;
        frame
    }

    pub struct FakeTransport {
        bus: Rc<RefCell<FakeBus>>,
    }

    /// Connector that opens transports on one fake bus.
    pub struct FakeConnector {
        pub bus: Rc<RefCell<FakeBus>>,
        pub pinned: Option<String>,
    }

    impl FakeConnector {
        pub fn new(bus: &Rc<RefCell<FakeBus>>) -> Self {
            Self {
                bus: bus.clone(),
                pinned: None,
            }
        }
    }

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        fn connect(&mut self) -> Result<FakeTransport> {
            FakeBus::connect(&self.bus)
        }

        fn pin(&mut self, serial: &str) {
            self.pinned = Some(serial.to_string());
        }
    }

    impl FakeTransport {
        pub fn open(bus: &Rc<RefCell<FakeBus>>) -> Self {
            FakeBus::connect(bus).unwrap()
        }
    }

    impl Drop for FakeTransport {
        fn drop(&mut self) {
            self.bus.borrow_mut().live -= 1;
        }
    }

    impl UsbTransport for FakeTransport {
        fn device_descriptor(&self) -> Result<DeviceDescriptor> {
            Ok(self.bus.borrow().descriptor)
        }

        fn configuration(&self) -> Result<ConfigurationLayout> {
            Ok(self.bus.borrow().configuration.clone())
        }

        fn set_configuration(&mut self, value: u8) -> Result<()> {
            self.bus.borrow_mut().selected_configuration = Some(value);
            Ok(())
        }

        fn claim_interface(&mut self, _number: u8) -> Result<()> {
            Ok(())
        }

        fn read_string_descriptor(&self, _index: u8) -> Result<String> {
            Ok(FAKE_SERIAL.to_string())
        }

        fn control_out(&mut self, _request: u8, value: u16) -> Result<()> {
            self.bus.borrow_mut().control_values.push(value);
            Ok(())
        }

        fn bulk_out(&mut self, endpoint: u8, chunk: &[u8]) -> Result<usize> {
            let mut bus = self.bus.borrow_mut();
            let call = bus.bulk_out_calls;
            bus.bulk_out_calls += 1;
            if bus.fail_chunk == Some(call) {
                return Err(KrakenError::Transfer {
                    message: "scripted failure".into(),
                });
            }
            bus.chunks.push((endpoint, chunk.to_vec()));
            Ok(chunk.len())
        }

        fn bulk_in(&mut self, _endpoint: u8, len: usize) -> Result<Vec<u8>> {
            let mut bus = self.bus.borrow_mut();
            if bus.failing_reads > 0 {
                bus.failing_reads -= 1;
                return Err(KrakenError::Transfer {
                    message: "scripted read failure".into(),
                });
            }
            let mut frame = bus.status_frame.clone();
            frame.truncate(len);
            Ok(frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FAKE_OUT, FakeBus, FakeTransport};
    use super::*;

    #[test]
    fn test_small_payload_is_one_chunk() {
        let bus = FakeBus::new();
        let mut transport = FakeTransport::open(&bus);

        write_chunked(&mut transport, FAKE_OUT, &[0xAA; 19]).unwrap();

        let sizes: Vec<usize> = bus.borrow().payloads().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![19]);
    }

    #[test]
    fn test_large_payload_is_split() {
        let bus = FakeBus::new();
        let mut transport = FakeTransport::open(&bus);

        write_chunked(&mut transport, FAKE_OUT, &[0x55; 130]).unwrap();

        let sizes: Vec<usize> = bus.borrow().payloads().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 64, 2]);
    }

    #[test]
    fn test_failed_chunk_aborts_write() {
        let bus = FakeBus::new();
        bus.borrow_mut().fail_chunk = Some(1);
        let mut transport = FakeTransport::open(&bus);

        let result = write_chunked(&mut transport, FAKE_OUT, &[0x55; 130]);

        assert!(result.is_err());
        let bus = bus.borrow();
        assert_eq!(bus.bulk_out_calls, 2);
        assert_eq!(bus.payloads().len(), 1);
    }
}
