//! Knot vector construction: averaged (P&T eq. 9.68/9.69) and uniform.

use crate::error::{Error, Result};

/// A clamped knot vector for one axis: `p + 1` repeated knots at each end,
/// `n - p` interior knots, stored as a flat, non-decreasing sequence of
/// length `n + p + 2` where `n` is the number of control point spans
/// (`nctrl_pts - 1`).
pub type KnotVector = Vec<f64>;

/// Builds a clamped knot vector by averaging the parameter values that fall
/// within a sliding window, following P&T eq. 9.69. `params` is the
/// parameter vector for this axis (length `m + 1`); `nctrl_pts` is the
/// desired number of control points for this axis.
///
/// `d` is taken as the ratio of input-point spans to internal knot spans,
/// matching the original's deliberate deviation from the textbook ratio of
/// `(m + 1) / (n - p + 1)`.
pub fn averaged_knots(p: usize, nctrl_pts: usize, params: &[f64]) -> Result<KnotVector> {
    if nctrl_pts <= p {
        return Err(Error::Shape(format!(
            "nctrl_pts ({nctrl_pts}) must be greater than degree ({p})"
        )));
    }
    let n = nctrl_pts - 1;
    let m = params.len() - 1;
    let nknots = n + p + 2;
    let mut knots = vec![0.0f64; nknots];

    let interior_spans = n - p;
    if interior_spans > 0 {
        let d = (f64::from(u32::try_from(m).unwrap())) / f64::from(u32::try_from(interior_spans).unwrap());
        for j in 1..=interior_spans {
            let jd = f64::from(u32::try_from(j).unwrap()) * d;
            let i = jd.floor() as usize;
            let a = jd - jd.floor();
            let lo = params[i.min(m)];
            let hi = params[(i + 1).min(m)];
            knots[p + j] = (1.0 - a) * lo + a * hi;
        }
    }

    for i in 0..=p {
        knots[i] = 0.0;
        knots[nknots - 1 - i] = 1.0;
    }

    Ok(knots)
}

/// Builds a clamped, uniformly spaced knot vector: `p + 1` repeated knots at
/// each end and `n - p` evenly spaced interior knots, independent of the
/// parameterization.
#[must_use]
pub fn uniform_knots(p: usize, nctrl_pts: usize) -> KnotVector {
    let n = nctrl_pts.saturating_sub(1);
    let nknots = n + p + 2;
    let mut knots = vec![0.0f64; nknots];

    let interior_spans = n.saturating_sub(p);
    if interior_spans > 0 {
        for j in 1..=interior_spans {
            knots[p + j] =
                f64::from(u32::try_from(j).unwrap()) / f64::from(u32::try_from(interior_spans + 1).unwrap());
        }
    }

    for i in 0..=p {
        if i < nknots {
            knots[i] = 0.0;
        }
        if nknots >= 1 + i {
            knots[nknots - 1 - i] = 1.0;
        }
    }

    knots
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn uniform_knots_are_clamped_and_sorted() {
        let knots = uniform_knots(3, 7);
        assert_eq!(knots.len(), 7 + 3 + 1);
        for w in knots.windows(2) {
            assert!(w[0] <= w[1]);
        }
        for i in 0..=3 {
            assert_approx_eq!(f64, knots[i], 0.0);
            assert_approx_eq!(f64, knots[knots.len() - 1 - i], 1.0);
        }
    }

    #[test]
    fn averaged_knots_matches_uniform_on_uniform_params() {
        let params: Vec<f64> = (0..=6).map(|i| f64::from(i) / 6.0).collect();
        let knots = averaged_knots(3, 7, &params).unwrap();
        let uniform = uniform_knots(3, 7);
        for (a, b) in knots.iter().zip(&uniform) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn rejects_too_few_control_points() {
        assert!(averaged_knots(3, 3, &[0.0, 0.5, 1.0]).is_err());
    }
}
