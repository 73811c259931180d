//! Bias-scan helpers: pedestal-frame rescaling and the ideal response line.
//!
//! The fit works in a frame where the station pedestal maps to 0 V, but a
//! bias scan steps through absolute voltages and rarely lands on exactly
//! 1.5 V. These helpers pick the scan step closest to the nominal pedestal
//! and shift voltages, ADC counts, and the fit window into the fit frame.
//! They operate on caller-supplied arrays; run discovery and pedestal
//! bookkeeping across runs stay with the caller.

use crate::domain::{FitWindow, LAB4D_MAX_COUNTS, LAB4D_MAX_VOLTAGE};
use crate::error::{CalError, Result};

/// Ideal linear LAB4D response: full ADC scale over the full input range.
///
/// Used as the linearity baseline when quantifying how far a fitted curve
/// deviates from a perfect digitizer.
pub fn ideal_adc(v: f64) -> f64 {
    v * (LAB4D_MAX_COUNTS / LAB4D_MAX_VOLTAGE)
}

/// Inverse of [`ideal_adc`].
pub fn ideal_voltage(adc: f64) -> f64 {
    adc * (LAB4D_MAX_VOLTAGE / LAB4D_MAX_COUNTS)
}

/// The scan step chosen as the pedestal reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PedestalFrame {
    /// Index of the chosen step in the bias array.
    pub index: usize,
    /// Measured bias voltage at that step.
    pub vref: f64,
}

/// Pick the bias step closest to `v_ref` (nominally 1.5 V).
///
/// The scan's voltage steps do not hit the nominal pedestal exactly, so the
/// closest measured step defines the frame instead.
pub fn pedestal_frame(vbias: &[f64], v_ref: f64) -> Result<PedestalFrame> {
    let (index, &vref) = vbias
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - v_ref).abs().total_cmp(&(*b - v_ref).abs()))
        .ok_or_else(|| CalError::Load("empty bias-voltage array".to_string()))?;
    Ok(PedestalFrame { index, vref })
}

/// Shift bias voltages so the reference step maps to 0.
pub fn rescale_voltages(vbias: &[f64], frame: &PedestalFrame) -> Vec<f64> {
    vbias.iter().map(|&v| v - frame.vref).collect()
}

/// Shift ADC counts so the reading at the reference step maps to 0.
pub fn rescale_adc(adc: &[f64], frame: &PedestalFrame) -> Result<Vec<f64>> {
    let base = *adc.get(frame.index).ok_or_else(|| {
        CalError::shape("adc array", format!("> {} entries", frame.index), adc.len())
    })?;
    Ok(adc.iter().map(|&a| a - base).collect())
}

/// Fit window anchored on the measured pedestal of this frame.
pub fn fit_window(frame: &PedestalFrame, fit_min: f64, fit_max: f64) -> Result<FitWindow> {
    FitWindow::new(fit_min, fit_max, frame.vref)
}
