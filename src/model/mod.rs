//! The calibration curve model: evaluation and inversion.

pub mod curve;

pub use curve::*;
