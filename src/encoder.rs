//! Fixed-size least-squares encoding: one separable 1-D solve per axis per
//! science variable, following algorithm 9.7 of P&T (p. 422) and its n-d
//! generalization in the original `Approx`/`Approx1d`/`Residual` routines.
//!
//! Each axis is solved independently by holding every other axis's index
//! fixed and fitting a curve through the samples that vary only along the
//! current axis (`ndarray`'s `lanes_mut` gives exactly these 1-D curves).
//! Axes are processed in order, so axis `k + 1`'s curves are fit through
//! control points produced by axis `k`'s solve rather than through the raw
//! samples — the same double-buffering the original performs manually with
//! `temp_ctrl0`/`temp_ctrl1`, expressed here as array replacement instead of
//! index arithmetic over a flat buffer.

use crate::basis::{basis_funs, find_span};
use crate::error::{Error, Result};
use crate::info::{KnotConstructionMethod, MfaInfo, ParamMethod, RegularizationMode};
use crate::knots::{averaged_knots, uniform_knots, KnotVector};
use crate::model::MfaData;
use crate::nd_iter::MultiIndexIter;
use crate::params::{chord_length_params, uniform_domain_params};
use crate::point_set::PointSet;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, IxDyn};

/// Evaluates the full (not windowed) basis row at `u`: index `i` holds
/// `N_i(u)` for `i` in `0..=n`, zero outside the `p + 1` nonvanishing span.
fn full_basis_row(p: usize, knots: &[f64], n: usize, u: f64) -> Result<Array1<f64>> {
    let span = find_span(p, n, knots, u)?;
    let local = basis_funs(p, knots, span, u);
    let mut row = Array1::zeros(n + 1);
    for (j, &v) in local.iter().enumerate() {
        let n_i = span + j;
        if n_i >= p && n_i - p <= n {
            row[n_i - p] = v;
        }
    }
    Ok(row)
}

/// Rationalizes a full basis row in place: `R_i = N_i * w_i / sum_j(N_j *
/// w_j)`, the NURBS substitution of P&T eq. 4.2 applied to an entire row at
/// once rather than per-span. A no-op (up to floating-point rounding) when
/// every weight is 1, since the row already sums to 1 by the partition-of-
/// unity property of the B-spline basis.
fn rationalize_row(row: Array1<f64>, weights: &[f64]) -> Array1<f64> {
    let denom: f64 = row.iter().zip(weights).map(|(&n, &w)| n * w).sum();
    if denom.abs() < 1e-300 {
        return row;
    }
    Array1::from_iter(row.iter().zip(weights).map(|(&n, &w)| n * w / denom))
}

/// Builds the `interior x interior` finite-difference smoothness matrix
/// `Sᵀ·S` used to regularize the normal equations: `S`'s rows are the
/// central second-difference (and, for [`RegularizationMode::FirstAndSecondDerivative`],
/// also the central first-difference) stencil over the `nctrl` control
/// points, restricted to the columns of the interior (non-clamped) control
/// points the solve is actually free to move. The two control points
/// immediately adjacent to each clamped endpoint only ever appear in a
/// stencil row together with a clamped point, so those two boundary rows
/// are omitted rather than built with a zeroed endpoint term — a
/// simplification recorded in `DESIGN.md`.
fn smoothness_matrix(nctrl: usize, interior: usize, mode: RegularizationMode) -> Array2<f64> {
    let mut st_s = Array2::<f64>::zeros((interior, interior));
    if interior == 0 {
        return st_s;
    }

    // second-difference stencil: f''(i) ~ f(i-1) - 2 f(i) + f(i+1), centered
    // on every control point that has a left and right neighbor, i.e. every
    // full-grid index in 1..nctrl-1. Column index into `interior` space is
    // full-grid index minus 1 (index 0 and nctrl-1 are clamped).
    let mut rows: Vec<Vec<(usize, f64)>> = Vec::new();
    for center in 1..nctrl.saturating_sub(1) {
        let mut row = Vec::with_capacity(3);
        for (offset, coeff) in [(center - 1, 1.0), (center, -2.0), (center + 1, 1.0)] {
            if offset >= 1 && offset <= interior {
                row.push((offset - 1, coeff));
            }
        }
        rows.push(row);
    }
    if matches!(mode, RegularizationMode::FirstAndSecondDerivative) {
        for center in 0..nctrl.saturating_sub(1) {
            let mut row = Vec::with_capacity(2);
            for (offset, coeff) in [(center, -1.0), (center + 1, 1.0)] {
                if offset >= 1 && offset <= interior {
                    row.push((offset - 1, coeff));
                }
            }
            if !row.is_empty() {
                rows.push(row);
            }
        }
    }

    for row in &rows {
        for &(i, ci) in row {
            for &(j, cj) in row {
                st_s[[i, j]] += ci * cj;
            }
        }
    }
    st_s
}

/// Solves the symmetric positive-definite system `a x = b` via dense LDLᵀ
/// decomposition (no pivoting, matching the original's reliance on `NtN`
/// being positive definite). Returns one column per column of `b`.
fn ldlt_solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n == 0 {
        return Ok(Array2::zeros((0, b.ncols())));
    }
    if a.ncols() != n || b.nrows() != n {
        return Err(Error::Shape("ldlt_solve: incompatible matrix shapes".to_string()));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    let mut d = Array1::<f64>::zeros(n);

    for j in 0..n {
        let mut sum = a[[j, j]];
        for k in 0..j {
            sum -= l[[j, k]] * l[[j, k]] * d[k];
        }
        if sum.abs() < 1e-14 {
            return Err(Error::Numeric(format!(
                "normal-equations matrix is singular or near-singular at pivot {j}"
            )));
        }
        d[j] = sum;
        l[[j, j]] = 1.0;

        for i in (j + 1)..n {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]] * d[k];
            }
            l[[i, j]] = sum / d[j];
        }
    }

    let mut y = Array2::<f64>::zeros((n, b.ncols()));
    for col in 0..b.ncols() {
        for i in 0..n {
            let mut sum = b[[i, col]];
            for k in 0..i {
                sum -= l[[i, k]] * y[[k, col]];
            }
            y[[i, col]] = sum;
        }
    }

    let mut z = Array2::<f64>::zeros((n, b.ncols()));
    for col in 0..b.ncols() {
        for i in 0..n {
            z[[i, col]] = y[[i, col]] / d[i];
        }
    }

    let mut x = Array2::<f64>::zeros((n, b.ncols()));
    for col in 0..b.ncols() {
        for i in (0..n).rev() {
            let mut sum = z[[i, col]];
            for k in (i + 1)..n {
                sum -= l[[k, i]] * x[[k, col]];
            }
            x[[i, col]] = sum;
        }
    }

    Ok(x)
}

/// Fits a single 1-D curve of `nctrl` control points through `values`
/// (sampled at `params`), clamping the first and last control points to the
/// first and last sample. Interior control points solve the normal
/// equations `NtN P = R` (P&T eq. 9.63-9.67). When `weights` is `Some`, each
/// full basis row is first rationalized against it (NURBS fit instead of a
/// plain B-spline fit); when `reg_lambda` is positive, `lambda * Sᵀ·S` (the
/// finite-difference smoothness penalty selected by `reg_mode`) is added to
/// `NtN` before the solve.
#[allow(clippy::too_many_arguments)]
fn solve_curve(
    p: usize,
    knots: &[f64],
    params: &[f64],
    values: ArrayView1<'_, f64>,
    nctrl: usize,
    weights: Option<&[f64]>,
    reg_lambda: f64,
    reg_mode: RegularizationMode,
) -> Result<Array1<f64>> {
    let n = nctrl - 1;
    let m = values.len() - 1;

    if n == 0 {
        return Ok(Array1::from_elem(1, values[0]));
    }

    let interior = n.saturating_sub(1);
    if interior == 0 {
        let mut out = Array1::zeros(nctrl);
        out[0] = values[0];
        out[n] = values[m];
        return Ok(out);
    }

    let mut nmat = Array2::<f64>::zeros((m.saturating_sub(1), interior));
    let mut full_rows = Vec::with_capacity(m + 1);
    for k in 0..=m {
        let row = full_basis_row(p, knots, n, params[k])?;
        full_rows.push(match weights {
            Some(w) => rationalize_row(row, w),
            None => row,
        });
    }
    for k in 1..m {
        let row = &full_rows[k];
        for i in 1..n {
            nmat[[k - 1, i - 1]] = row[i];
        }
    }

    let mut ntn = nmat.t().dot(&nmat);
    if reg_lambda > 0.0 && !matches!(reg_mode, RegularizationMode::None) {
        let st_s = smoothness_matrix(nctrl, interior, reg_mode);
        ntn = ntn + reg_lambda * st_s;
    }

    let mut rk = Array2::<f64>::zeros((m.saturating_sub(1), 1));
    for k in 1..m {
        let row = &full_rows[k];
        rk[[k - 1, 0]] = values[k] - row[0] * values[0] - row[n] * values[m];
    }
    let r = nmat.t().dot(&rk);

    let p_interior = ldlt_solve(&ntn, &r)?;

    let mut out = Array1::zeros(nctrl);
    out[0] = values[0];
    out[n] = values[m];
    for i in 0..interior {
        out[i + 1] = p_interior[[i, 0]];
    }
    Ok(out)
}

/// Builds per-axis parameters and knot vectors for `points` according to
/// `info`, then runs the separable fixed encoder described at the top of
/// this module, producing one [`MfaData`] for the geometry and one for
/// each science variable.
pub fn encode_fixed(points: &PointSet, info: &MfaInfo) -> Result<(MfaData, Vec<MfaData>)> {
    let dom_dim = points.dom_dim();
    if info.dom_dim() != dom_dim {
        return Err(Error::Shape(format!(
            "MfaInfo is configured for {} domain axes but the point set has {dom_dim}",
            info.dom_dim()
        )));
    }

    let ndom_pts = points.ndom_pts().to_vec();
    let params = match info.param_method() {
        ParamMethod::ChordLength => chord_length_params(points.domain().view(), &ndom_pts)?,
        ParamMethod::Domain => uniform_domain_params(&ndom_pts),
    };

    let knots: Vec<KnotVector> = (0..dom_dim)
        .map(|axis| match info.knot_method() {
            KnotConstructionMethod::Averaged => averaged_knots(info.degree()[axis], info.nctrl_pts()[axis], &params[axis]),
            KnotConstructionMethod::Uniform => Ok(uniform_knots(info.degree()[axis], info.nctrl_pts()[axis])),
        })
        .collect::<Result<_>>()?;

    // Resolve, per axis, the NURBS weight vector the solve should rationalize
    // against: explicit weights if the caller set them via
    // `MfaInfo::set_axis_weights`, all-ones if weighting is enabled but left
    // unset, or `None` (plain B-spline fit) if weighting is disabled.
    let axis_weights: Vec<Option<Vec<f64>>> = (0..dom_dim)
        .map(|axis| {
            if !info.weighted() {
                return None;
            }
            Some(info.axis_weights(axis).map_or_else(|| vec![1.0; info.nctrl_pts()[axis]], <[f64]>::to_vec))
        })
        .collect();

    let total_cols = points.domain().ncols();
    let mut fitted_cols: Vec<Array1<f64>> = Vec::with_capacity(total_cols);

    for col in 0..total_cols {
        let field = ArrayD::from_shape_vec(IxDyn(&ndom_pts), points.domain().column(col).to_owned().into_raw_vec())
            .map_err(|e| Error::Shape(e.to_string()))?;

        let solved = encode_field(
            field,
            &ndom_pts,
            info.nctrl_pts(),
            info.degree(),
            &knots,
            &params,
            &axis_weights,
            info.reg_lambda(),
            info.regularization(),
        )?;
        fitted_cols.push(Array1::from_iter(solved.iter().copied()));
    }

    // Flatten the per-axis weight vectors into one weight per control point
    // (row-major over `nctrl_pts`) via an outer product, matching the
    // row-major layout `MultiIndexIter`/`ravel_multi_index` use everywhere
    // else a flattened control-point index is needed.
    let flat_weights: Option<Vec<f64>> = if axis_weights.iter().any(Option::is_some) {
        let resolved: Vec<Vec<f64>> = axis_weights
            .iter()
            .enumerate()
            .map(|(axis, w)| w.clone().unwrap_or_else(|| vec![1.0; info.nctrl_pts()[axis]]))
            .collect();
        Some(
            MultiIndexIter::new(info.nctrl_pts())
                .map(|idx| idx.iter().enumerate().map(|(axis, &i)| resolved[axis][i]).product())
                .collect(),
        )
    } else {
        None
    };

    let total_ctrl: usize = info.nctrl_pts().iter().product();
    let mut geometry_ctrl = Array2::<f64>::zeros((total_ctrl, dom_dim));
    for axis in 0..dom_dim {
        geometry_ctrl.column_mut(axis).assign(&fitted_cols[axis]);
    }

    let nvars = total_cols - dom_dim;
    let mut variable_data = Vec::with_capacity(nvars);
    for v in 0..nvars {
        let mut ctrl = Array2::<f64>::zeros((total_ctrl, 1));
        ctrl.column_mut(0).assign(&fitted_cols[dom_dim + v]);
        let mut data = MfaData::new(info.degree().to_vec(), knots.clone(), ctrl)?;
        if let Some(w) = &flat_weights {
            data.tmesh_mut().tensor_mut(0)?.weights = w.clone();
        }
        variable_data.push(data);
    }

    let mut geometry = MfaData::new(info.degree().to_vec(), knots, geometry_ctrl)?;
    if let Some(w) = &flat_weights {
        geometry.tmesh_mut().tensor_mut(0)?.weights = w.clone();
    }

    Ok((geometry, variable_data))
}

#[allow(clippy::too_many_arguments)]
fn encode_field(
    mut field: ArrayD<f64>,
    ndom_pts: &[usize],
    nctrl_pts: &[usize],
    degree: &[usize],
    knots: &[KnotVector],
    params: &[Vec<f64>],
    axis_weights: &[Option<Vec<f64>>],
    reg_lambda: f64,
    reg_mode: RegularizationMode,
) -> Result<ArrayD<f64>> {
    let dom_dim = ndom_pts.len();
    let mut shape: Vec<usize> = ndom_pts.to_vec();

    for axis in 0..dom_dim {
        let mut new_shape = shape.clone();
        new_shape[axis] = nctrl_pts[axis];
        let mut new_field = ArrayD::<f64>::zeros(IxDyn(&new_shape));

        let old_lanes = field.lanes(Axis(axis));
        let new_lanes = new_field.lanes_mut(Axis(axis));
        for (old_lane, mut new_lane) in old_lanes.into_iter().zip(new_lanes) {
            let curve = old_lane.to_owned();
            let solved = solve_curve(
                degree[axis],
                &knots[axis],
                &params[axis],
                curve.view(),
                nctrl_pts[axis],
                axis_weights[axis].as_deref(),
                reg_lambda,
                reg_mode,
            )?;
            new_lane.assign(&solved);
        }

        field = new_field;
        shape[axis] = nctrl_pts[axis];
    }

    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_set::PointSet;
    use float_cmp::assert_approx_eq;
    use ndarray::Array2;

    #[test]
    fn interpolates_a_straight_line_exactly() {
        let n = 9;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = 2.0 * x + 1.0;
        }
        let points = PointSet::new(domain, vec![n], 1).unwrap();

        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);

        let (geometry, vars) = encode_fixed(&points, &info).unwrap();
        assert_eq!(geometry.ctrl_pts().ncols(), 1);
        assert_eq!(vars.len(), 1);
        // control points should be monotonically increasing for a line
        let y = vars[0].ctrl_pts();
        for w in y.column(0).to_vec().windows(2) {
            assert!(w[1] >= w[0] - 1e-9);
        }
        assert_approx_eq!(f64, y[[0, 0]], 1.0, epsilon = 1e-9);
        assert_approx_eq!(f64, y[[y.nrows() - 1, 0]], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn regularization_shrinks_a_spiky_fit() {
        let n = 21;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = if i == n / 2 { 5.0 } else { 0.0 };
        }
        let points = PointSet::new(domain, vec![n], 1).unwrap();

        let mut plain_info = MfaInfo::new(1, false);
        plain_info.set_degree(0, 3);
        plain_info.set_nctrl_pts(0, 9);
        let (_, plain_vars) = encode_fixed(&points, &plain_info).unwrap();
        let plain_peak = plain_vars[0].ctrl_pts().column(0).iter().copied().fold(0.0f64, f64::max);

        let mut reg_info = MfaInfo::new(1, false);
        reg_info.set_degree(0, 3);
        reg_info.set_nctrl_pts(0, 9);
        reg_info.set_regularization(50.0, RegularizationMode::SecondDerivative);
        let (_, reg_vars) = encode_fixed(&points, &reg_info).unwrap();
        let reg_peak = reg_vars[0].ctrl_pts().column(0).iter().copied().fold(0.0f64, f64::max);

        assert!(reg_peak < plain_peak, "plain={plain_peak} reg={reg_peak}");
    }

    #[test]
    fn ldlt_solve_matches_known_system() {
        let a = Array2::from_shape_vec((2, 2), vec![4.0, 1.0, 1.0, 3.0]).unwrap();
        let b = Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap();
        let x = ldlt_solve(&a, &b).unwrap();
        // 4x + y = 1, x + 3y = 2 -> x = 1/11, y = 7/11
        assert_approx_eq!(f64, x[[0, 0]], 1.0 / 11.0, epsilon = 1e-9);
        assert_approx_eq!(f64, x[[1, 0]], 7.0 / 11.0, epsilon = 1e-9);
    }
}
