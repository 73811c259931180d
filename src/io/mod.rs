//! Reading and writing portable calibration-table files.

pub mod table;

pub use table::*;
