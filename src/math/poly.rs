//! Polynomial evaluation and root finding.
//!
//! Coefficients are ascending power order throughout the crate:
//! `p(v) = c[0] + c[1] v + c[2] v² + …` (the source format stores them
//! descending; the loader flips them once).

use nalgebra::DMatrix;

/// Evaluate an ascending-order polynomial at `v` (Horner).
pub fn polyval(coeffs: &[f32], v: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * v + f64::from(c))
}

/// Evaluate an ascending-order f64 polynomial at `v` (Horner).
pub fn polyval_f64(coeffs: &[f64], v: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * v + c)
}

/// All real roots of an ascending-order polynomial.
///
/// Roots are the eigenvalues of the companion matrix; eigenvalues with
/// `|imag| > imag_tol` are discarded. Trailing zero coefficients (vanishing
/// high orders) are trimmed first so the companion matrix stays well-posed.
/// A constant polynomial has no roots.
pub fn real_roots(coeffs: &[f64], imag_tol: f64) -> Vec<f64> {
    let mut order = coeffs.len();
    while order > 0 && coeffs[order - 1] == 0.0 {
        order -= 1;
    }
    if order <= 1 {
        return Vec::new();
    }

    let n = order - 1;
    let lead = coeffs[n];
    if n == 1 {
        return vec![-coeffs[0] / lead];
    }

    let mut companion = DMatrix::<f64>::zeros(n, n);
    for i in 1..n {
        companion[(i, i - 1)] = 1.0;
    }
    for i in 0..n {
        companion[(i, n - 1)] = -coeffs[i] / lead;
    }

    companion
        .complex_eigenvalues()
        .iter()
        .filter(|z| z.im.abs() <= imag_tol)
        .map(|z| z.re)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyval_matches_direct_expansion() {
        // p(v) = 1 + 2v + 3v²
        let coeffs = [1.0_f32, 2.0, 3.0];
        assert!((polyval(&coeffs, 0.0) - 1.0).abs() < 1e-12);
        assert!((polyval(&coeffs, 2.0) - 17.0).abs() < 1e-12);
        assert!((polyval(&coeffs, -1.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn real_roots_of_factored_quadratic() {
        // (v - 1)(v + 3) = v² + 2v - 3
        let mut roots = real_roots(&[-3.0, 2.0, 1.0], 1e-5);
        roots.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(roots.len(), 2);
        assert!((roots[0] + 3.0).abs() < 1e-9);
        assert!((roots[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn real_roots_discards_complex_pair() {
        // v² + 1 has no real roots.
        let roots = real_roots(&[1.0, 0.0, 1.0], 1e-5);
        assert!(roots.is_empty());
    }

    #[test]
    fn real_roots_trims_vanishing_high_orders() {
        // Stored as degree 9 but effectively linear: 2v - 1.
        let mut coeffs = vec![0.0; 10];
        coeffs[0] = -1.0;
        coeffs[1] = 2.0;
        let roots = real_roots(&coeffs, 1e-5);
        assert_eq!(roots.len(), 1);
        assert!((roots[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn real_roots_of_constant_is_empty() {
        assert!(real_roots(&[4.0], 1e-5).is_empty());
        assert!(real_roots(&[], 1e-5).is_empty());
    }
}
