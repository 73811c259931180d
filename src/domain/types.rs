//! Shared domain types.
//!
//! These types are intentionally lightweight and immutable after load so they
//! can be:
//!
//! - shared freely across threads during per-sample evaluation
//! - serialized alongside diagnostics by downstream tooling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalError, Result};
use crate::math::lerp_sorted;

/// Number of readout channels per station.
pub const NUM_CHANNELS: usize = 24;

/// Number of storage-cell samples per channel (two LAB4D buffers).
pub const NUM_SAMPLES: usize = 4096;

/// Polynomial coefficients per (channel, sample) response curve.
pub const NUM_COEFFS: usize = 10;

/// Samples per storage window.
pub const SAMPLES_PER_WINDOW: usize = 128;

/// Storage windows per buffer; windows 0–15 address the first buffer,
/// 16–31 the second.
pub const WINDOWS_PER_BUFFER: usize = 16;

/// Samples in a recorded waveform.
pub const WAVEFORM_SAMPLES: usize = 2048;

/// Full-scale input voltage of the LAB4D digitizer.
pub const LAB4D_MAX_VOLTAGE: f64 = 2.5;

/// Full-scale ADC count of the LAB4D digitizer.
pub const LAB4D_MAX_COUNTS: f64 = 4095.0;

/// Nominal station pedestal, the reference point of the fit frame.
pub const PEDESTAL_VOLTAGE: f64 = 1.5;

/// Lower edge of the fitted bias range (absolute volts).
pub const FIT_MIN_VOLTAGE: f64 = -1.3;

/// Upper edge of the fitted bias range (absolute volts).
pub const FIT_MAX_VOLTAGE: f64 = 0.7;

/// One of the two physical digitization paths.
///
/// Channels 0–11 are driven by the first bias DAC, channels 12–23 by the
/// second. Each path gets its own averaged residual curve. The cut at
/// channel 11 is hard wiring, not configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DacGroup {
    Dac1,
    Dac2,
}

impl DacGroup {
    /// Group owning a given channel.
    pub fn from_channel(channel: usize) -> Self {
        if channel > 11 { DacGroup::Dac2 } else { DacGroup::Dac1 }
    }

    /// Index into per-group arrays (0 or 1).
    pub fn index(self) -> usize {
        match self {
            DacGroup::Dac1 => 0,
            DacGroup::Dac2 => 1,
        }
    }
}

/// Validity window of one calibration table (bias-scan start/end).
///
/// Purely bookkeeping: callers use it to match tables to runs; nothing in
/// the evaluator depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window from epoch seconds, validating order.
    pub fn from_epoch(start: i64, end: i64) -> Result<Self> {
        let start = DateTime::from_timestamp(start, 0)
            .ok_or_else(|| CalError::Load(format!("invalid start time {start}")))?;
        let end = DateTime::from_timestamp(end, 0)
            .ok_or_else(|| CalError::Load(format!("invalid end time {end}")))?;
        if end < start {
            return Err(CalError::Load(format!(
                "calibration end time {end} precedes start time {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `t` falls inside the window (inclusive).
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Voltage search window for inversion, in the pedestal-rescaled frame.
///
/// The fit runs over absolute bias voltages `[fit_min, fit_max]` but its
/// coefficients live in a frame where the station pedestal (`vref`,
/// nominally 1.5 V) maps to 0. Rescaled bounds are therefore
/// `fit_min - vref` and `fit_max - vref`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitWindow {
    pub fit_min: f64,
    pub fit_max: f64,
    pub vref: f64,
}

impl FitWindow {
    pub fn new(fit_min: f64, fit_max: f64, vref: f64) -> Result<Self> {
        if !(fit_min.is_finite() && fit_max.is_finite() && vref.is_finite()) {
            return Err(CalError::Load(format!(
                "non-finite fit window [{fit_min}, {fit_max}] vref {vref}"
            )));
        }
        if fit_max <= fit_min {
            return Err(CalError::Load(format!(
                "empty fit window [{fit_min}, {fit_max}]"
            )));
        }
        Ok(Self { fit_min, fit_max, vref })
    }

    /// Lower search bound in the rescaled frame.
    pub fn rescaled_min(&self) -> f64 {
        self.fit_min - self.vref
    }

    /// Upper search bound in the rescaled frame.
    pub fn rescaled_max(&self) -> f64 {
        self.fit_max - self.vref
    }
}

impl Default for FitWindow {
    /// Nominal window: −1.3 V to +0.7 V around a 1.5 V pedestal.
    fn default() -> Self {
        Self {
            fit_min: FIT_MIN_VOLTAGE,
            fit_max: FIT_MAX_VOLTAGE,
            vref: PEDESTAL_VOLTAGE,
        }
    }
}

/// The full per-station coefficient block, stored flat.
///
/// Layout is row-major channel → sample → coefficient, ascending power
/// order, exactly `24 × 4096 × 10` entries. Immutable after load.
#[derive(Debug, Clone)]
pub struct CoefficientTable {
    data: Vec<f32>,
}

impl CoefficientTable {
    /// Wrap a flat coefficient block, validating its length.
    pub fn new(data: Vec<f32>) -> Result<Self> {
        let expected = NUM_CHANNELS * NUM_SAMPLES * NUM_COEFFS;
        if data.len() != expected {
            return Err(CalError::shape("coefficient table", expected, data.len()));
        }
        Ok(Self { data })
    }

    /// The ten coefficients for one (channel, sample), ascending power order.
    pub fn coeffs(&self, channel: usize, sample: usize) -> Result<&[f32]> {
        if channel >= NUM_CHANNELS {
            return Err(CalError::Index {
                what: "channel",
                value: channel,
                limit: NUM_CHANNELS,
            });
        }
        if sample >= NUM_SAMPLES {
            return Err(CalError::Index {
                what: "sample",
                value: sample,
                limit: NUM_SAMPLES,
            });
        }
        let offset = (channel * NUM_SAMPLES + sample) * NUM_COEFFS;
        Ok(&self.data[offset..offset + NUM_COEFFS])
    }
}

/// One DAC group's averaged residual curve: sorted (voltage, residual)
/// sample points defining a piecewise-linear correction.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualTable {
    voltages: Vec<f64>,
    residuals: Vec<f64>,
}

impl ResidualTable {
    /// Build a table from paired arrays, validating pairing, non-emptiness,
    /// and voltage ordering.
    pub fn new(voltages: Vec<f64>, residuals: Vec<f64>) -> Result<Self> {
        if voltages.len() != residuals.len() {
            return Err(CalError::shape(
                "residual table",
                format!("paired arrays of equal length ({})", voltages.len()),
                residuals.len(),
            ));
        }
        if voltages.is_empty() {
            return Err(CalError::Load("empty residual table".to_string()));
        }
        if voltages.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalError::Load(
                "residual voltages not strictly increasing".to_string(),
            ));
        }
        Ok(Self { voltages, residuals })
    }

    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Drop trailing points so the table has exactly `len` entries.
    ///
    /// Used at load time to index-align the two DAC groups' tables (the fit
    /// writes tables of slightly different lengths). Alignment is by tail
    /// truncation, not by voltage value; see the loader.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.voltages.truncate(len);
        self.residuals.truncate(len);
    }

    /// Residual at `v` by linear interpolation between the bracketing
    /// points.
    ///
    /// Voltages outside the table's span clamp to the edge values (the
    /// historical scan wrapped to the *last* entry below the span, which was
    /// a defect; clamping is the deliberate replacement).
    pub fn interpolate(&self, v: f64) -> f64 {
        lerp_sorted(&self.voltages, &self.residuals, v)
    }
}

/// Output of `CalibrationCurveModel::evaluate`: one modeled ADC value per
/// requested voltage, as f32 like the fit itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub values: Vec<f32>,
}

/// Output of the residual-free polynomial inversion.
///
/// `saturated` marks the clamp-to-edge fallback: the target ADC had no root
/// in the expected branch, so `voltage` is the rescaled upper fit bound
/// rather than a solution. Callers that need exact roots must check it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InversionResult {
    pub voltage: f64,
    pub saturated: bool,
}

/// Per-voltage mean and spread of the modeled response across all 4096
/// samples of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpread {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}
