//! Piecewise-linear interpolation over a sorted abscissa.

/// Linear interpolation of `(xs, ys)` at `x`, with `xs` strictly increasing.
///
/// The bracketing interval is found by binary search. Outside the span the
/// edge value is returned (clamped, `np.interp`-style): the old linear scan
/// this replaces wrapped to the last entry for `x` below the first point,
/// which produced garbage corrections at the very bottom of the range.
///
/// Callers guarantee `xs` is non-empty and paired with `ys`; the residual
/// table constructor enforces both.
pub fn lerp_sorted(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(!xs.is_empty());

    let i = xs.partition_point(|&xv| xv <= x);
    if i == 0 {
        return ys[0];
    }
    if i == xs.len() {
        return ys[xs.len() - 1];
    }

    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    y0 + (y1 - y0) / (x1 - x0) * (x - x0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_inside_each_interval() {
        let xs = [0.0, 1.0, 3.0];
        let ys = [0.0, 10.0, 30.0];
        assert!((lerp_sorted(&xs, &ys, 0.5) - 5.0).abs() < 1e-12);
        assert!((lerp_sorted(&xs, &ys, 2.0) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn exact_knots_return_knot_values() {
        let xs = [-1.0, 0.0, 2.0];
        let ys = [3.0, 5.0, 9.0];
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((lerp_sorted(&xs, &ys, *x) - y).abs() < 1e-12);
        }
    }

    #[test]
    fn clamps_below_and_above_span() {
        let xs = [0.0, 1.0];
        let ys = [2.0, 4.0];
        assert!((lerp_sorted(&xs, &ys, -5.0) - 2.0).abs() < 1e-12);
        assert!((lerp_sorted(&xs, &ys, 5.0) - 4.0).abs() < 1e-12);
    }
}
