//! Cooling controller: source selection, curve evaluation and hysteresis.
//!
//! Holds the per-iteration state the control loop needs to turn a pair of
//! temperature readings into the fan and pump duty cycles to apply.

use serde::Deserialize;

use crate::cooling::curve::Curve;
use crate::error::{KrakenError, Result};
use crate::protocol::{Channel, DUTY_STEP};

/// Largest decrease applied to a duty cycle in one iteration.
pub const MAX_DUTY_DECREASE: u8 = DUTY_STEP;

/// Temperature source for calculating duty cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempSource {
    /// Internal liquid temp from Kraken sensor
    Liquid,
    /// External CPU temp from system sensors
    Cpu,
}

impl std::str::FromStr for TempSource {
    type Err = KrakenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(TempSource::Cpu),
            "liquid" => Ok(TempSource::Liquid),
            other => Err(KrakenError::InvalidConfig(format!(
                "Unknown temperature source '{}', expected cpu or liquid",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TempSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TempSource::Liquid => write!(f, "Liquid"),
            TempSource::Cpu => write!(f, "CPU"),
        }
    }
}

/// Cap a decrease from `previous` to at most 5 points; increases pass through.
///
/// With no previous value the target is applied as-is.
///
/// # Arguments
/// * `previous` - Duty applied in the prior iteration, if any
/// * `target` - Duty the curve asks for now
pub fn damp_duty(previous: Option<u8>, target: u8) -> u8 {
    match previous {
        Some(prev) if target < prev => target.max(prev.saturating_sub(MAX_DUTY_DECREASE)),
        _ => target,
    }
}

// =============================================================================
// Curves and duties
// =============================================================================

/// Active fan and pump curves.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSet {
    pub fan: Curve,
    pub pump: Curve,
}

impl CurveSet {
    pub fn get(&self, channel: Channel) -> &Curve {
        match channel {
            Channel::Fan => &self.fan,
            Channel::Pump => &self.pump,
        }
    }
}

/// A fan/pump duty pair in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duties {
    pub fan: u8,
    pub pump: u8,
}

impl std::fmt::Display for Duties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fan {}%, pump {}%", self.fan, self.pump)
    }
}

// =============================================================================
// ControlState
// =============================================================================

/// Mutable state of the control loop between iterations.
///
/// The curve set and source selection are swapped out on config reload;
/// the last applied duties survive so damping carries across a reload.
#[derive(Debug, Clone)]
pub struct ControlState {
    source: TempSource,
    curves: CurveSet,
    applied: Option<Duties>,
}

impl ControlState {
    pub fn new(source: TempSource, curves: CurveSet) -> Self {
        Self {
            source,
            curves,
            applied: None,
        }
    }

    /// Install a freshly loaded source selection and curve set.
    pub fn reload(&mut self, source: TempSource, curves: CurveSet) {
        self.source = source;
        self.curves = curves;
    }

    pub fn source(&self) -> TempSource {
        self.source
    }

    pub fn curves(&self) -> &CurveSet {
        &self.curves
    }

    /// Duties applied in the last iteration, if any.
    pub fn applied(&self) -> Option<Duties> {
        self.applied
    }

    /// Pick the reading the curves are evaluated at.
    pub fn select_reading(&self, cpu_c: i32, liquid_c: i32) -> i32 {
        match self.source {
            TempSource::Cpu => cpu_c,
            TempSource::Liquid => liquid_c,
        }
    }

    /// Raw curve targets at `reading`, before damping.
    pub fn targets(&self, reading: i32) -> Duties {
        Duties {
            fan: self.curves.fan.duty_at(reading),
            pump: self.curves.pump.duty_at(reading),
        }
    }

    /// Curve targets at `reading` with hysteresis against the last applied duties.
    pub fn next_duties(&self, reading: i32) -> Duties {
        let raw = self.targets(reading);
        Duties {
            fan: damp_duty(self.applied.map(|d| d.fan), raw.fan),
            pump: damp_duty(self.applied.map(|d| d.pump), raw.pump),
        }
    }

    /// Record the duties just applied. Returns true if they differ from the
    /// previous iteration's.
    pub fn record(&mut self, duties: Duties) -> bool {
        let changed = self.applied != Some(duties);
        self.applied = Some(duties);
        changed
    }
}
