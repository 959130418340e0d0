//! Temperature to duty-cycle curves.
//!
//! A curve is built from sparse `(temperature, duty)` breakpoints plus two
//! implicit anchors, `(0, 30)` and `(100, 100)`. Adjacent points define
//! linear segments; evaluating a segment rounds down to a multiple of 5 so
//! the applied duty never exceeds the configured line.

use crate::error::{KrakenError, Result};
use crate::protocol::{DUTY_STEP, MAX_DUTY, MIN_DUTY};

/// Lowest temperature a curve covers.
pub const CURVE_MIN_TEMP: i32 = 0;

/// Highest temperature a curve covers.
pub const CURVE_MAX_TEMP: i32 = 100;

/// Implicit floor anchor.
pub const FLOOR_POINT: Breakpoint = Breakpoint {
    temperature: CURVE_MIN_TEMP,
    duty: MIN_DUTY,
};

/// Implicit ceiling anchor.
pub const CEILING_POINT: Breakpoint = Breakpoint {
    temperature: CURVE_MAX_TEMP,
    duty: MAX_DUTY,
};

/// Absorbs float error so an exact multiple of 5 is not rounded down a step.
const QUANTIZE_EPSILON: f64 = 1e-9;

// =============================================================================
// Breakpoint
// =============================================================================

/// A configured `(temperature °C, duty %)` anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub temperature: i32,
    pub duty: u8,
}

impl Breakpoint {
    /// Build a breakpoint from a `[temperature, duty]` pair as found in config files.
    ///
    /// # Errors
    /// Returns `InvalidProfile` if the pair does not have exactly two values,
    /// the temperature is outside 0-100, or the duty is not a multiple of 5
    /// within 30-100.
    pub fn from_pair(pair: &[i64]) -> Result<Self> {
        let &[temperature, duty] = pair else {
            return Err(KrakenError::InvalidProfile(format!(
                "Expecting [temperature, duty] pairs, got {} values",
                pair.len()
            )));
        };

        if !(CURVE_MIN_TEMP as i64..=CURVE_MAX_TEMP as i64).contains(&temperature) {
            return Err(KrakenError::InvalidProfile(format!(
                "Temperature {}°C outside {}-{}°C",
                temperature, CURVE_MIN_TEMP, CURVE_MAX_TEMP
            )));
        }
        if duty % DUTY_STEP as i64 != 0 {
            return Err(KrakenError::InvalidProfile(format!(
                "Duty {}% is not divisible by {}",
                duty, DUTY_STEP
            )));
        }
        if !(MIN_DUTY as i64..=MAX_DUTY as i64).contains(&duty) {
            return Err(KrakenError::InvalidProfile(format!(
                "Duty {}% outside {}-{}%",
                duty, MIN_DUTY, MAX_DUTY
            )));
        }

        Ok(Breakpoint {
            temperature: temperature as i32,
            duty: duty as u8,
        })
    }
}

// =============================================================================
// Segment
// =============================================================================

/// Linear piece of a curve, valid on `(lower, threshold]` where `lower` is
/// the next breakpoint down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Temperature of the upper breakpoint this segment is keyed by.
    pub threshold: i32,
    pub slope: f64,
    pub intercept: f64,
}

impl Segment {
    /// Line through `upper` and `lower` (`upper.temperature > lower.temperature`).
    fn between(upper: Breakpoint, lower: Breakpoint) -> Self {
        let slope = (lower.duty as f64 - upper.duty as f64)
            / (lower.temperature - upper.temperature) as f64;
        let intercept = lower.duty as f64 - slope * lower.temperature as f64;

        Segment {
            threshold: upper.temperature,
            slope,
            intercept,
        }
    }

    /// Evaluate the line at `temp`, rounded down to a multiple of 5.
    pub fn evaluate(&self, temp: i32) -> u8 {
        quantize(self.slope * temp as f64 + self.intercept)
    }
}

/// Round down to the nearest multiple of 5, kept within 30-100.
pub fn quantize(raw: f64) -> u8 {
    let step = DUTY_STEP as f64;
    let stepped = ((raw + QUANTIZE_EPSILON) / step).floor() * step;
    stepped.clamp(MIN_DUTY as f64, MAX_DUTY as f64) as u8
}

// =============================================================================
// Curve
// =============================================================================

/// Total, monotone step function from temperature to duty cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    /// Ordered by descending threshold.
    segments: Vec<Segment>,
}

impl Curve {
    /// Build a curve from user breakpoints.
    ///
    /// A user point at 0°C or 100°C replaces the implicit anchor there. An
    /// empty list is legal and yields the plain anchor-to-anchor line.
    ///
    /// # Errors
    /// Returns `InvalidProfile` for duplicate temperatures or for duties that
    /// decrease as temperature rises.
    pub fn from_breakpoints(points: &[Breakpoint]) -> Result<Self> {
        // An empty profile keeps only the anchors: 30% at 0°C rising to 100% at 100°C.
        let mut all: Vec<Breakpoint> = points.to_vec();
        for anchor in [FLOOR_POINT, CEILING_POINT] {
            if !all.iter().any(|p| p.temperature == anchor.temperature) {
                all.push(anchor);
            }
        }
        all.sort_by(|a, b| b.temperature.cmp(&a.temperature));

        for pair in all.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            if upper.temperature == lower.temperature {
                return Err(KrakenError::InvalidProfile(format!(
                    "Duplicate breakpoint at {}°C",
                    upper.temperature
                )));
            }
            if upper.duty < lower.duty {
                return Err(KrakenError::InvalidProfile(format!(
                    "Duty drops from {}% at {}°C to {}% at {}°C",
                    lower.duty, lower.temperature, upper.duty, upper.temperature
                )));
            }
        }

        let segments = all
            .windows(2)
            .map(|pair| Segment::between(pair[0], pair[1]))
            .collect();

        Ok(Curve { segments })
    }

    /// Build a curve straight from config `[temperature, duty]` pairs.
    pub fn from_pairs(pairs: &[Vec<i64>]) -> Result<Self> {
        let points = pairs
            .iter()
            .map(|pair| Breakpoint::from_pair(pair))
            .collect::<Result<Vec<_>>>()?;
        Self::from_breakpoints(&points)
    }

    /// Duty cycle for the given temperature.
    ///
    /// Uses the segment keyed by the smallest threshold strictly above
    /// `temp`; at or above the top breakpoint the topmost segment applies.
    /// Temperatures outside 0-100 are clamped first.
    pub fn duty_at(&self, temp: i32) -> u8 {
        let temp = temp.clamp(CURVE_MIN_TEMP, CURVE_MAX_TEMP);
        let segment = self
            .segments
            .iter()
            .rev()
            .find(|s| s.threshold > temp)
            .unwrap_or(&self.segments[0]);

        segment.evaluate(temp)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self {
            segments: vec![Segment::between(CEILING_POINT, FLOOR_POINT)],
        }
    }
}
