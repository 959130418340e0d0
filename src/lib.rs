//! NZXT Kraken X61 Daemon Library
//!
//! A userspace cooling daemon for the NZXT Kraken X61 liquid cooler.
//!
//! # Features
//!
//! - Talk to the X61 over USB (color, fan and pump commands, status frames)
//! - Turn sparse temperature/duty breakpoints into step-quantized curves
//! - Run a hysteresis-damped control loop that reconnects after failures
//!
//! # Example
//!
//! ```no_run
//! use kraken_x61_daemon::cooling::Curve;
//! use kraken_x61_daemon::device::{KrakenX61, usb};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open and initialize the device
//!     let mut kraken = KrakenX61::open(usb::open_first()?)?;
//!     println!("Connected! Serial: {}", kraken.serial_number()?);
//!
//!     // Evaluate a curve at the current liquid temperature
//!     let curve = Curve::from_pairs(&[vec![30, 40], vec![50, 70]])?;
//!     if let Some(status) = kraken.push_color() {
//!         let duty = curve.duty_at(status.liquid_temp_c as i32);
//!         kraken.set_fan_duty(duty)?;
//!         kraken.set_pump_duty(duty)?;
//!         kraken.push_speeds();
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cooling;
pub mod daemon;
pub mod device;
pub mod error;
pub mod protocol;
pub mod utils;

// Re-exports for convenience
pub use daemon::{Daemon, DaemonState, ShutdownToken};
pub use device::KrakenX61;
pub use error::{KrakenError, Result};
pub use protocol::Channel;
