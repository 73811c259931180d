//! Mathematical utilities: polynomial evaluation and roots, piecewise-linear
//! interpolation, and a bracketed root finder.

pub mod brent;
pub mod interp;
pub mod poly;

pub use brent::*;
pub use interp::*;
pub use poly::*;
