//! Raw calibration-table schema and JSON read/write.
//!
//! The fit itself runs elsewhere and writes its output through a columnar
//! tree container; that reader is an external collaborator. This crate owns
//! the raw in-memory shape it hands over ([`RawCalibration`]) plus a
//! portable JSON rendering of it, so tables can be cached and replayed
//! without the original container stack.
//!
//! `RawCalibration` is unvalidated by design: shape checks, coefficient
//! reordering, and residual alignment happen in
//! [`CalibrationCurveModel::from_raw`](crate::model::CalibrationCurveModel::from_raw).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalError, Result};

/// Unvalidated contents of one calibration table, as read from the source.
///
/// - `coeffs`: flattened `24 × 4096 × 10` block, row-major channel → sample
///   → coefficient, each 10-block in **descending** power order (the source
///   convention; the model flips to ascending on load).
/// - `start_time` / `end_time`: validity window, epoch seconds.
/// - `vres_*` / `residual_*`: the two DAC groups' averaged residual curves
///   as paired (voltage, residual) arrays. Lengths may differ between the
///   groups; alignment happens at model construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCalibration {
    pub coeffs: Vec<f32>,
    pub start_time: i64,
    pub end_time: i64,
    pub vres_dac1: Vec<f64>,
    pub residual_dac1: Vec<f64>,
    pub vres_dac2: Vec<f64>,
    pub residual_dac2: Vec<f64>,
}

/// Read a raw calibration table from a JSON file.
pub fn read_table_json(path: &Path) -> Result<RawCalibration> {
    let file = File::open(path).map_err(|e| {
        CalError::Load(format!("failed to open table '{}': {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| CalError::Load(format!("invalid table JSON '{}': {e}", path.display())))
}

/// Write a raw calibration table as JSON.
pub fn write_table_json(path: &Path, raw: &RawCalibration) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        CalError::Load(format!("failed to create table '{}': {e}", path.display()))
    })?;
    serde_json::to_writer(file, raw)
        .map_err(|e| CalError::Load(format!("failed to write table JSON: {e}")))
}
