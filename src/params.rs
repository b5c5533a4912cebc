//! Parameterization: mapping input data points to `[0, 1]` curve parameters.
//!
//! Two methods are provided, selected by [`crate::info::ParamMethod`]:
//! chord-length parameterization (P&T eq. 9.3, the n-d generalization used
//! by the original `Params`/`Params1d` routines) and plain domain-ratio
//! parameterization for data that is already uniformly spaced.

use crate::error::{Error, Result};
use ndarray::ArrayView2;

/// Per-axis parameter vectors for a tensor-product grid of input points.
/// `params[k]` holds the parameter value of every grid line along axis `k`,
/// in increasing order; it has length `ndom_pts[k]`.
pub type AxisParams = Vec<Vec<f64>>;

/// Chord-length parameterization of a tensor-product grid of samples.
///
/// `domain` holds the geometry coordinates of every sample, one row per
/// sample, ordered so the first axis varies fastest (row-major over
/// `ndom_pts`). For each axis `k`, parameters are computed along every curve
/// that varies only in that axis and then averaged over all such curves, so
/// that all curves share one parameter vector per axis (P&T p. 377).
///
/// Curves whose total chord length is zero (a degenerate, constant-valued
/// curve) are excluded from the average rather than contributing `NaN`.
pub fn chord_length_params(domain: ArrayView2<'_, f64>, ndom_pts: &[usize]) -> Result<AxisParams> {
    let total: usize = ndom_pts.iter().product();
    if domain.nrows() != total {
        return Err(Error::Shape(format!(
            "domain has {} rows but ndom_pts {:?} implies {total}",
            domain.nrows(),
            ndom_pts
        )));
    }

    let mut result = Vec::with_capacity(ndom_pts.len());

    let mut cs = 1usize; // stride of domain points within a curve, for axis k
    for (k, &nk) in ndom_pts.iter().enumerate() {
        let ncurves = total / nk;
        let mut params = vec![0.0f64; nk];
        let mut contributions = vec![0usize; nk];

        let ss = cs * nk; // stride at which the curve offset jumps to the next block
        let mut co = 0usize; // offset of the current curve's first point
        let mut coo = 0usize;

        for j in 0..ncurves {
            let mut dists = vec![0.0f64; nk.saturating_sub(1)];
            let mut tot_dist = 0.0f64;
            for i in 0..nk.saturating_sub(1) {
                let a = domain.row(co + i * cs);
                let b = domain.row(co + (i + 1) * cs);
                let dist = a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x - y).powi(2))
                    .sum::<f64>()
                    .sqrt();
                dists[i] = dist;
                tot_dist += dist;
            }

            if tot_dist > 0.0 {
                let mut prev = 0.0f64;
                params[0] += 0.0;
                contributions[0] += 1;
                for i in 0..nk.saturating_sub(2) {
                    let dfrac = dists[i] / tot_dist;
                    params[i + 1] += prev + dfrac;
                    contributions[i + 1] += 1;
                    prev += dfrac;
                }
                if nk > 1 {
                    params[nk - 1] += 1.0;
                    contributions[nk - 1] += 1;
                }
            }

            if (j + 1) % cs != 0 {
                co += 1;
            } else {
                co = coo + ss;
                coo = co;
            }
        }

        for (p, &c) in params.iter_mut().zip(&contributions) {
            if c > 0 {
                *p /= f64::from(u32::try_from(c).unwrap_or(1));
            }
        }
        if nk > 0 {
            params[0] = 0.0;
            if nk > 1 {
                params[nk - 1] = 1.0;
            }
        }

        result.push(params);
        cs *= nk;
    }

    Ok(result)
}

/// Domain-ratio parameterization: the `i`-th of `n` points along an axis is
/// assigned parameter `i / (n - 1)`, independent of the geometry. Cheaper
/// than chord-length and appropriate when the input grid is already close
/// to uniformly spaced in parameter space.
#[must_use]
pub fn uniform_domain_params(ndom_pts: &[usize]) -> AxisParams {
    ndom_pts
        .iter()
        .map(|&n| {
            if n <= 1 {
                vec![0.0; n]
            } else {
                (0..n)
                    .map(|i| f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap()))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::Array2;

    #[test]
    fn uniform_params_span_unit_interval() {
        let params = uniform_domain_params(&[5]);
        assert_approx_eq!(f64, params[0][0], 0.0);
        assert_approx_eq!(f64, params[0][4], 1.0);
        assert_approx_eq!(f64, params[0][2], 0.5);
    }

    #[test]
    fn chord_length_matches_uniform_on_evenly_spaced_line() {
        let domain = Array2::from_shape_vec((5, 1), vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let params = chord_length_params(domain.view(), &[5]).unwrap();
        let uniform = uniform_domain_params(&[5]);
        for (a, b) in params[0].iter().zip(&uniform[0]) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let domain = Array2::from_shape_vec((3, 1), vec![0.0, 1.0, 2.0]).unwrap();
        assert!(chord_length_params(domain.view(), &[5]).is_err());
    }
}
