//! Device layer for the NZXT Kraken X61.
//!
//! Provides discovery, the USB transport and the session type.

pub mod kraken;
pub mod transport;
pub mod usb;

pub use kraken::KrakenX61;
pub use transport::{Connector, UsbTransport, write_chunked};
pub use usb::{NusbTransport, UsbConnector};
