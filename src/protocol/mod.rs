//! USB protocol implementation for the NZXT Kraken X61.
//!
//! This module contains the command constants, command buffers, descriptor
//! checks and status frame decoding. No I/O happens here.

pub mod commands;
pub mod descriptors;
pub mod status;

pub use commands::*;
pub use descriptors::{ConfigurationLayout, DeviceDescriptor, EndpointPair, InterfaceLayout};
pub use status::*;
