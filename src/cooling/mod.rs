//! Cooling control module.
//!
//! Provides temperature-to-duty curves and the hysteresis-damped control logic.

pub mod controller;
pub mod curve;

pub use controller::{ControlState, CurveSet, Duties, TempSource, damp_duty};
pub use curve::{Breakpoint, Curve, Segment};
