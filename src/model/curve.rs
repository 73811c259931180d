//! Per-(channel, sample) voltage-calibration curve model.
//!
//! A loaded table models the ADC response of every storage cell as a
//! degree-9 polynomial in the pedestal-rescaled bias voltage, plus a
//! piecewise-linear residual correction shared per DAC group:
//!
//! ```text
//! adc(v) = Σ c_k v^k  +  R(v)
//! ```
//!
//! Two inversion paths exist with deliberately different failure policies:
//!
//! - [`CalibrationCurveModel::invert`] ignores the residual, solves the
//!   polynomial by companion-matrix roots, and **clamps** to the upper fit
//!   bound when no root survives branch filtering (saturation, flagged in
//!   the result, never an error).
//! - [`CalibrationCurveModel::calibrate_trace`] includes the residual and
//!   uses a bracketed Brent solve per waveform sample; a missing bracket is
//!   a fatal [`CalError::Numerical`]. Waveform calibration must not
//!   silently substitute edge values.
//!
//! The model is immutable after construction; all evaluation is pure, so
//! per-sample work runs on rayon with no locking.

use log::{debug, warn};
use rayon::prelude::*;

use crate::domain::{
    ChannelSpread, CoefficientTable, DacGroup, EvaluationResult, FitWindow, InversionResult,
    NUM_CHANNELS, NUM_COEFFS, NUM_SAMPLES, ResidualTable, SAMPLES_PER_WINDOW, TimeWindow,
    WAVEFORM_SAMPLES, WINDOWS_PER_BUFFER,
};
use crate::error::{CalError, Result};
use crate::io::RawCalibration;
use crate::math::{DEFAULT_MAX_ITER, DEFAULT_XTOL, brent, polyval, real_roots};

/// Roots with |imaginary part| above this are numerical artifacts of the
/// companion-matrix solve, not curve solutions.
const IMAG_TOL: f64 = 1e-5;

/// One station's voltage calibration: coefficient block, validity window,
/// and the two index-aligned DAC-group residual tables.
#[derive(Debug, Clone)]
pub struct CalibrationCurveModel {
    coeffs: CoefficientTable,
    window: TimeWindow,
    residuals: [ResidualTable; 2],
}

impl CalibrationCurveModel {
    /// Validate a raw table and build the immutable model.
    ///
    /// - checks the coefficient block is exactly `24 × 4096 × 10` and flips
    ///   each 10-block from the source's descending order to ascending
    /// - checks each residual pair and truncates the longer one to the
    ///   shorter's length (tail truncation, preserving order — the fit
    ///   writes index-aligned tables whose lengths occasionally differ by a
    ///   few trailing points)
    pub fn from_raw(raw: RawCalibration) -> Result<Self> {
        let expected = NUM_CHANNELS * NUM_SAMPLES * NUM_COEFFS;
        if raw.coeffs.len() != expected {
            return Err(CalError::shape("coefficient block", expected, raw.coeffs.len()));
        }
        let mut ascending = Vec::with_capacity(expected);
        for block in raw.coeffs.chunks_exact(NUM_COEFFS) {
            ascending.extend(block.iter().rev());
        }
        let coeffs = CoefficientTable::new(ascending)?;

        let window = TimeWindow::from_epoch(raw.start_time, raw.end_time)?;

        let mut dac1 = ResidualTable::new(raw.vres_dac1, raw.residual_dac1)?;
        let mut dac2 = ResidualTable::new(raw.vres_dac2, raw.residual_dac2)?;
        if dac1.len() != dac2.len() {
            let keep = dac1.len().min(dac2.len());
            warn!(
                "residual tables differ in length ({} vs {}); truncating to {keep}",
                dac1.len(),
                dac2.len()
            );
            dac1.truncate(keep);
            dac2.truncate(keep);
        }

        debug!(
            "loaded calibration table: {} residual points per DAC group, valid {} – {}",
            dac1.len(),
            window.start(),
            window.end()
        );

        Ok(Self {
            coeffs,
            window,
            residuals: [dac1, dac2],
        })
    }

    /// Load a model from a JSON table file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        Self::from_raw(crate::io::read_table_json(path)?)
    }

    /// Validity window of this table.
    pub fn time_window(&self) -> &TimeWindow {
        &self.window
    }

    /// Residual table of one DAC group.
    pub fn residual_table(&self, group: DacGroup) -> &ResidualTable {
        &self.residuals[group.index()]
    }

    /// Ascending-order coefficients for one (channel, sample).
    pub fn coefficients(&self, channel: usize, sample: usize) -> Result<&[f32]> {
        self.coeffs.coeffs(channel, sample)
    }

    /// Modeled ADC response at each voltage for one (channel, sample).
    ///
    /// When `voltages.len()` equals the residual table length the residual
    /// trace is applied index-aligned, with no interpolation. That is a
    /// genuine alternate mode, not an approximation: bias-scan comparisons
    /// evaluate the curve on exactly the bias steps the residual was
    /// averaged on, and pair point `i` with residual `i` by construction.
    /// Any other length interpolates the residual at each voltage.
    pub fn evaluate(
        &self,
        voltages: &[f64],
        channel: usize,
        sample: usize,
    ) -> Result<EvaluationResult> {
        let coeffs = self.coeffs.coeffs(channel, sample)?;
        let res = self.residual_table(DacGroup::from_channel(channel));

        let values: Vec<f32> = if voltages.len() == res.len() {
            voltages
                .iter()
                .zip(res.residuals())
                .map(|(&v, &r)| (polyval(coeffs, v) + r) as f32)
                .collect()
        } else {
            voltages
                .iter()
                .map(|&v| (polyval(coeffs, v) + res.interpolate(v)) as f32)
                .collect()
        };

        Ok(EvaluationResult { values })
    }

    /// Invert the residual-free polynomial at one ADC value.
    ///
    /// Solves `p(v) = adc` by companion-matrix roots, discards roots with a
    /// non-negligible imaginary part, then keeps only the expected branch:
    /// negative ADC targets must come from `[rescaled_min, 0)`, non-negative
    /// ones from `[0, rescaled_max]`. The raw polynomial has spurious roots
    /// outside the fitted range.
    ///
    /// When nothing survives, the target is outside the achievable range and
    /// the result clamps to `rescaled_max` with `saturated` set. That is a
    /// normal outcome, not an error.
    pub fn invert(
        &self,
        adc: f64,
        channel: usize,
        sample: usize,
        window: &FitWindow,
    ) -> Result<InversionResult> {
        let coeffs = self.coeffs.coeffs(channel, sample)?;
        let mut shifted: Vec<f64> = coeffs.iter().map(|&c| f64::from(c)).collect();
        shifted[0] -= adc;

        let lo = window.rescaled_min();
        let hi = window.rescaled_max();
        let best = real_roots(&shifted, IMAG_TOL)
            .into_iter()
            .filter(|&v| {
                if adc < 0.0 {
                    lo <= v && v < 0.0
                } else {
                    0.0 <= v && v <= hi
                }
            })
            // The response is monotonic within each half-range, so at most
            // one root is genuine; if several survive, the one nearest the
            // pedestal is it.
            .min_by(|a, b| a.abs().total_cmp(&b.abs()));

        Ok(match best {
            Some(voltage) => InversionResult {
                voltage,
                saturated: false,
            },
            None => InversionResult {
                voltage: hi,
                saturated: true,
            },
        })
    }

    /// Calibrate a recorded waveform back to voltages (strict inversion).
    ///
    /// For each of the 2048 trace samples this solves
    /// `p(v) + R(v) = adc[k]` with a bracketed Brent search over the fit
    /// window, using the coefficient row of the storage cell that actually
    /// recorded sample `k` (see [`window_sample_indices`]).
    ///
    /// Fails with [`CalError::Numerical`] if any sample's ADC value has no
    /// bracketed root — unlike [`Self::invert`], which clamps.
    pub fn calibrate_trace(
        &self,
        adc: &[f32],
        channel: usize,
        starting_window: usize,
        window: &FitWindow,
    ) -> Result<Vec<f64>> {
        if adc.len() != WAVEFORM_SAMPLES {
            return Err(CalError::shape("waveform", WAVEFORM_SAMPLES, adc.len()));
        }
        // Validate the channel up front so worker errors can only be numerical.
        self.coeffs.coeffs(channel, 0)?;
        let order = window_sample_indices(starting_window)?;
        let res = self.residual_table(DacGroup::from_channel(channel));
        let lo = window.rescaled_min();
        let hi = window.rescaled_max();

        order
            .par_iter()
            .zip(adc.par_iter())
            .map(|(&sample, &a)| {
                let coeffs = self.coeffs.coeffs(channel, sample)?;
                let target = f64::from(a);
                brent(
                    |v| polyval(coeffs, v) + res.interpolate(v) - target,
                    lo,
                    hi,
                    DEFAULT_XTOL,
                    DEFAULT_MAX_ITER,
                )
                .ok_or_else(|| {
                    CalError::Numerical(format!(
                        "no root in [{lo}, {hi}] for ADC {target} at sample {sample}"
                    ))
                })
            })
            .collect()
    }

    /// Mean and spread of the modeled response across all 4096 samples of a
    /// channel, per grid voltage.
    ///
    /// This is the reduction behind fit-quality overviews: one curve per
    /// storage cell, collapsed to a band. The residual correction is
    /// interpolated once per grid point (it is identical for every sample
    /// of the channel); the per-sample polynomials run on rayon.
    pub fn channel_spread(&self, voltages: &[f64], channel: usize) -> Result<ChannelSpread> {
        self.coeffs.coeffs(channel, 0)?;
        let res = self.residual_table(DacGroup::from_channel(channel));
        let corrections: Vec<f64> = voltages.iter().map(|&v| res.interpolate(v)).collect();

        let per_sample: Vec<Vec<f64>> = (0..NUM_SAMPLES)
            .into_par_iter()
            .map(|sample| -> Result<Vec<f64>> {
                let coeffs = self.coeffs.coeffs(channel, sample)?;
                Ok(voltages
                    .iter()
                    .zip(&corrections)
                    .map(|(&v, &r)| polyval(coeffs, v) + r)
                    .collect())
            })
            .collect::<Result<_>>()?;

        let n = per_sample.len() as f64;
        let mut mean = vec![0.0; voltages.len()];
        for row in &per_sample {
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut std = vec![0.0; voltages.len()];
        for row in &per_sample {
            for ((s, &m), &x) in std.iter_mut().zip(&mean).zip(row) {
                let d = x - m;
                *s += d * d;
            }
        }
        for s in &mut std {
            *s = (*s / n).sqrt();
        }

        Ok(ChannelSpread { mean, std })
    }
}

/// Storage-cell index of each sample in a recorded waveform.
///
/// Waveforms are 2048 samples but start on an arbitrary storage window
/// (bias scans always start on window 0; triggered data does not). Windows
/// are 128 samples; windows 0–15 live in the first buffer, 16–31 in the
/// second, so starting windows ≥ 16 address cells 2048–4095.
pub fn window_sample_indices(starting_window: usize) -> Result<Vec<usize>> {
    if starting_window >= 2 * WINDOWS_PER_BUFFER {
        return Err(CalError::Index {
            what: "starting window",
            value: starting_window,
            limit: 2 * WINDOWS_PER_BUFFER,
        });
    }
    let buffer_offset = if starting_window >= WINDOWS_PER_BUFFER {
        WAVEFORM_SAMPLES
    } else {
        0
    };
    Ok((0..WAVEFORM_SAMPLES)
        .map(|k| (SAMPLES_PER_WINDOW * starting_window + k) % WAVEFORM_SAMPLES + buffer_offset)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Raw table where every (channel, sample) shares one curve.
    ///
    /// `ascending` is given lowest order first; the raw block stores the
    /// source's descending convention, so it is reversed here.
    fn raw_table(
        ascending: [f32; NUM_COEFFS],
        vres_dac1: Vec<f64>,
        residual_dac1: Vec<f64>,
        vres_dac2: Vec<f64>,
        residual_dac2: Vec<f64>,
    ) -> RawCalibration {
        let mut descending = ascending;
        descending.reverse();
        let mut coeffs = Vec::with_capacity(NUM_CHANNELS * NUM_SAMPLES * NUM_COEFFS);
        for _ in 0..NUM_CHANNELS * NUM_SAMPLES {
            coeffs.extend_from_slice(&descending);
        }
        RawCalibration {
            coeffs,
            start_time: 1_600_000_000,
            end_time: 1_600_003_600,
            vres_dac1,
            residual_dac1,
            vres_dac2,
            residual_dac2,
        }
    }

    fn identity_line() -> [f32; NUM_COEFFS] {
        let mut c = [0.0; NUM_COEFFS];
        c[1] = 1.0;
        c
    }

    fn lab4d_line() -> [f32; NUM_COEFFS] {
        // Roughly the physical slope: 4095 counts over 2.5 V.
        let mut c = [0.0; NUM_COEFFS];
        c[1] = 1638.0;
        c
    }

    fn zero_residuals() -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        (
            vec![-1.3, 0.0, 0.7],
            vec![0.0, 0.0, 0.0],
            vec![-1.3, 0.0, 0.7],
            vec![0.0, 0.0, 0.0],
        )
    }

    fn model(raw: RawCalibration) -> CalibrationCurveModel {
        CalibrationCurveModel::from_raw(raw).unwrap()
    }

    fn centered_window() -> FitWindow {
        // Functional tests work directly in the rescaled frame.
        FitWindow::new(-1.3, 0.7, 0.0).unwrap()
    }

    #[test]
    fn identity_table_evaluates_to_identity() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(identity_line(), v1, r1, v2, r2));
        let out = m.evaluate(&[0.0, 1.0, 2.0], 3, 17).unwrap();
        assert_eq!(out.values, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn fast_path_applies_residual_index_aligned() {
        // Grid length equals residual length: residual added directly, no
        // interpolation, even though the grid voltages differ from the knots.
        let m = model(raw_table(
            identity_line(),
            vec![-1.0, 0.0, 1.0],
            vec![10.0, 20.0, 30.0],
            vec![-1.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0],
        ));
        let out = m.evaluate(&[0.5, 0.6, 0.7], 0, 0).unwrap();
        assert_relative_eq!(out.values[0], 10.5, max_relative = 1e-6);
        assert_relative_eq!(out.values[1], 20.6, max_relative = 1e-6);
        assert_relative_eq!(out.values[2], 30.7, max_relative = 1e-6);
    }

    #[test]
    fn interpolating_path_matches_polyval_plus_lerp() {
        let m = model(raw_table(
            lab4d_line(),
            vec![-1.0, 0.0, 1.0],
            vec![-4.0, 0.0, 8.0],
            vec![-1.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0],
        ));
        // Two voltages (≠ residual length 3) inside the span.
        let out = m.evaluate(&[-0.5, 0.5], 5, 100).unwrap();
        assert_relative_eq!(out.values[0], (1638.0 * -0.5 - 2.0) as f32, max_relative = 1e-6);
        assert_relative_eq!(out.values[1], (1638.0 * 0.5 + 4.0) as f32, max_relative = 1e-6);
    }

    #[test]
    fn dac_groups_use_their_own_residual_tables() {
        let m = model(raw_table(
            identity_line(),
            vec![-1.0, 1.0],
            vec![100.0, 100.0],
            vec![-1.0, 1.0],
            vec![-100.0, -100.0],
        ));
        // Channel 11 is the last Dac1 channel, 12 the first Dac2 one.
        let low = m.evaluate(&[0.0], 11, 0).unwrap();
        let high = m.evaluate(&[0.0], 12, 0).unwrap();
        assert_eq!(low.values[0], 100.0);
        assert_eq!(high.values[0], -100.0);
    }

    #[test]
    fn residual_tables_are_tail_truncated_to_equal_length() {
        let vres_dac1: Vec<f64> = (0..12).map(f64::from).collect();
        let residual_dac1: Vec<f64> = (100..112).map(f64::from).collect();
        let vres_dac2: Vec<f64> = (0..10).map(f64::from).collect();
        let residual_dac2: Vec<f64> = (200..210).map(f64::from).collect();
        let m = model(raw_table(
            identity_line(),
            vres_dac1,
            residual_dac1,
            vres_dac2,
            residual_dac2,
        ));

        let dac1 = m.residual_table(DacGroup::Dac1);
        assert_eq!(dac1.len(), 10);
        let expected: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(dac1.voltages(), expected.as_slice());
        let expected_res: Vec<f64> = (100..110).map(f64::from).collect();
        assert_eq!(dac1.residuals(), expected_res.as_slice());
        assert_eq!(m.residual_table(DacGroup::Dac2).len(), 10);
    }

    #[test]
    fn from_raw_rejects_wrong_coefficient_block() {
        let (v1, r1, v2, r2) = zero_residuals();
        let mut raw = raw_table(identity_line(), v1, r1, v2, r2);
        raw.coeffs.pop();
        assert!(matches!(
            CalibrationCurveModel::from_raw(raw),
            Err(CalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn from_raw_rejects_empty_residual_table() {
        let raw = raw_table(identity_line(), vec![], vec![], vec![-1.0, 1.0], vec![0.0, 0.0]);
        assert!(matches!(
            CalibrationCurveModel::from_raw(raw),
            Err(CalError::Load(_))
        ));
    }

    #[test]
    fn invert_recovers_polynomial_root() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(lab4d_line(), v1, r1, v2, r2));
        let window = centered_window();

        // Positive branch.
        let target = m.evaluate(&[0.3], 2, 40).unwrap().values[0] as f64;
        let inv = m.invert(target, 2, 40, &window).unwrap();
        assert!(!inv.saturated);
        assert_relative_eq!(inv.voltage, 0.3, max_relative = 1e-3);
        let check = polyval(m.coefficients(2, 40).unwrap(), inv.voltage);
        assert_relative_eq!(check, target, max_relative = 1e-3);

        // Negative branch.
        let target = m.evaluate(&[-0.8], 2, 40).unwrap().values[0] as f64;
        let inv = m.invert(target, 2, 40, &window).unwrap();
        assert!(!inv.saturated);
        assert_relative_eq!(inv.voltage, -0.8, max_relative = 1e-3);
    }

    #[test]
    fn invert_clamps_to_rescaled_upper_bound_on_saturation() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(lab4d_line(), v1, r1, v2, r2));
        // Nominal window: fit range −1.3 .. 0.7 V around the 1.5 V pedestal.
        let window = FitWindow::new(-1.3, 0.7, 1.5).unwrap();

        // Far beyond anything the curve reaches.
        let inv = m.invert(1.0e9, 0, 0, &window).unwrap();
        assert!(inv.saturated);
        assert_eq!(inv.voltage, window.rescaled_max());
        assert_eq!(inv.voltage, 0.7 - 1.5);
    }

    #[test]
    fn window_indices_follow_storage_order() {
        // Bias-scan case: start on window 0, first buffer.
        let idx = window_sample_indices(0).unwrap();
        assert_eq!(idx[0], 0);
        assert_eq!(idx[2047], 2047);

        // Mid-buffer start wraps within the first buffer.
        let idx = window_sample_indices(2).unwrap();
        assert_eq!(idx[0], 256);
        assert_eq!(idx[2047], 255);

        // Second buffer: offset by 2048.
        let idx = window_sample_indices(17).unwrap();
        assert_eq!(idx[0], 128 + 2048);
        assert!(idx.iter().all(|&i| (2048..4096).contains(&i)));

        assert!(window_sample_indices(32).is_err());
    }

    #[test]
    fn calibrate_trace_round_trips_a_synthetic_waveform() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(lab4d_line(), v1, r1, v2, r2));
        let window = centered_window();

        // Voltages well inside the window, varied across the trace.
        let truth: Vec<f64> = (0..WAVEFORM_SAMPLES)
            .map(|k| -1.0 + 1.5 * (k as f64 / WAVEFORM_SAMPLES as f64))
            .collect();
        let adc: Vec<f32> = truth.iter().map(|&v| (1638.0 * v) as f32).collect();

        let volts = m.calibrate_trace(&adc, 7, 3, &window).unwrap();
        assert_eq!(volts.len(), WAVEFORM_SAMPLES);
        for (got, want) in volts.iter().zip(&truth) {
            assert_relative_eq!(*got, *want, epsilon = 1e-3);
        }
    }

    #[test]
    fn calibrate_trace_fails_when_no_bracket_exists() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(lab4d_line(), v1, r1, v2, r2));
        let window = centered_window();

        // 1638 * 0.7 ≈ 1147 is the top of the achievable range.
        let adc = vec![3000.0_f32; WAVEFORM_SAMPLES];
        assert!(matches!(
            m.calibrate_trace(&adc, 0, 0, &window),
            Err(CalError::Numerical(_))
        ));
    }

    #[test]
    fn calibrate_trace_rejects_wrong_waveform_length() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(identity_line(), v1, r1, v2, r2));
        let window = centered_window();
        assert!(matches!(
            m.calibrate_trace(&[0.0; 100], 0, 0, &window),
            Err(CalError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn channel_spread_is_flat_for_a_shared_curve() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(lab4d_line(), v1, r1, v2, r2));
        let grid = [-0.5, 0.0, 0.5];
        let spread = m.channel_spread(&grid, 4).unwrap();

        // Every sample shares one curve, so the band has zero width.
        for (i, &v) in grid.iter().enumerate() {
            assert_relative_eq!(spread.mean[i], 1638.0 * v, max_relative = 1e-6);
            assert!(spread.std[i].abs() < 1e-9);
        }
    }

    #[test]
    fn channel_spread_reflects_per_sample_variation() {
        use rand::prelude::*;
        use rand_distr::Normal;

        // Per-sample slopes scattered around the physical value.
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(1638.0, 5.0).unwrap();
        let mut coeffs = vec![0.0_f32; NUM_CHANNELS * NUM_SAMPLES * NUM_COEFFS];
        for block in coeffs.chunks_exact_mut(NUM_COEFFS) {
            // Descending storage order: the linear term is second-to-last.
            block[NUM_COEFFS - 2] = normal.sample(&mut rng) as f32;
        }
        let raw = RawCalibration {
            coeffs,
            start_time: 1_600_000_000,
            end_time: 1_600_003_600,
            vres_dac1: vec![-1.3, 0.0, 0.7],
            residual_dac1: vec![0.0; 3],
            vres_dac2: vec![-1.3, 0.0, 0.7],
            residual_dac2: vec![0.0; 3],
        };
        let m = model(raw);

        let spread = m.channel_spread(&[0.5], 0).unwrap();
        assert_relative_eq!(spread.mean[0], 0.5 * 1638.0, max_relative = 0.01);
        assert!(spread.std[0] > 0.1);
    }

    #[test]
    fn evaluate_validates_indices() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(identity_line(), v1, r1, v2, r2));
        assert!(matches!(
            m.evaluate(&[0.0], 24, 0),
            Err(CalError::Index { .. })
        ));
        assert!(matches!(
            m.evaluate(&[0.0], 0, 4096),
            Err(CalError::Index { .. })
        ));
    }

    #[test]
    fn evaluate_accepts_empty_voltage_grid() {
        let (v1, r1, v2, r2) = zero_residuals();
        let m = model(raw_table(identity_line(), v1, r1, v2, r2));
        assert!(m.evaluate(&[], 0, 0).unwrap().values.is_empty());
    }
}
