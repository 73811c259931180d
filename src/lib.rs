//! `vc-curves` library crate.
//!
//! Voltage-calibration curve model for RNO-G LAB4D digitizers. A calibration
//! table carries, per (channel, sample), ten polynomial coefficients modeling
//! the ADC response as a function of bias voltage, plus a piecewise-linear
//! residual correction per DAC group. This crate:
//!
//! - loads and validates those tables into an immutable in-memory model
//! - evaluates the modeled ADC response for arbitrary voltage grids
//! - inverts the response (ADC → voltage), both the fast residual-free
//!   polynomial-root path and the strict bracketed path used to calibrate
//!   full waveforms
//!
//! Evaluation is pure and read-only against the loaded tables, so per-sample
//! work parallelizes freely (see [`model::CalibrationCurveModel`]).

pub mod bias;
pub mod domain;
pub mod error;
pub mod io;
pub mod math;
pub mod model;
