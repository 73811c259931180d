//! Error taxonomy for calibration loading, evaluation, and inversion.
//!
//! Three fatal classes:
//!
//! - [`CalError::Load`] — the source file/buffer does not contain the
//!   structure a calibration table must have. Raised at construction, never
//!   retried; the caller must supply a different table.
//! - [`CalError::ShapeMismatch`] — an array has the wrong dimensions after
//!   alignment (coefficient block, residual pair, waveform length).
//! - [`CalError::Numerical`] — the bracketed root finder found no sign
//!   change for an ADC sample. Surfaced, never silently substituted.
//!
//! Saturation during the residual-free polynomial inversion is *not* an
//! error; it is reported via `InversionResult::saturated`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CalError>;

#[derive(Debug, Error)]
pub enum CalError {
    /// Malformed or missing structure in the calibration source.
    #[error("failed to load calibration table: {0}")]
    Load(String),

    /// An array does not match its expected dimensions.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// An index argument is outside the table's fixed dimensions.
    #[error("{what} index {value} out of range (limit {limit})")]
    Index {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// A bracketed root solve failed (no sign change in the search window).
    #[error("numerical inversion failed: {0}")]
    Numerical(String),
}

impl CalError {
    pub(crate) fn shape(what: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        CalError::ShapeMismatch {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
