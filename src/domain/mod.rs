//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - the fixed LAB4D geometry constants (channels, samples, coefficients)
//! - the DAC-group cut ([`DacGroup`])
//! - the loaded table pieces ([`CoefficientTable`], [`ResidualTable`],
//!   [`TimeWindow`])
//! - operation outputs ([`EvaluationResult`], [`InversionResult`],
//!   [`ChannelSpread`])

pub mod types;

pub use types::*;
