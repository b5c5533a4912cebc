//! Point, derivative, and ray-integral decoding (§4.7), grounded on the
//! original `Decoder::VolPt`/`CurvePt`/`ErrorSpans` routines.

use crate::basis::{basis_funs, deriv_basis_funs, find_span};
use crate::error::{Error, Result};
use crate::model::MfaData;
use crate::nd_iter::MultiIndexIter;
use crate::tmesh::TensorProduct;
use ndarray::Array1;

/// Picks the tensor whose knot-index box contains `params`, preferring the
/// highest refinement level among ties (the same rule `Tmesh::neighbor_tensors`
/// applies to anchors).
fn locate_tensor<'a>(data: &'a MfaData, params: &[f64]) -> Result<&'a TensorProduct> {
    let tmesh = data.tmesh();
    let mut best: Option<&TensorProduct> = None;

    for t in tmesh.tensors() {
        let mut inside = true;
        for axis in 0..tmesh.dom_dim() {
            let knots = tmesh.knots(axis);
            let lo = knots[t.knot_mins[axis]];
            let hi = knots[t.knot_maxs[axis]];
            if params[axis] < lo - 1e-12 || params[axis] > hi + 1e-12 {
                inside = false;
                break;
            }
        }
        if inside && best.map_or(true, |b| t.level >= b.level) {
            best = Some(t);
        }
    }

    best.ok_or_else(|| Error::Domain(format!("{params:?} is outside every tensor of the T-mesh")))
}

fn validate_params(dom_dim: usize, params: &[f64]) -> Result<()> {
    if params.len() != dom_dim {
        return Err(Error::Shape(format!(
            "expected {dom_dim} parameters, got {}",
            params.len()
        )));
    }
    for &u in params {
        if !(0.0..=1.0).contains(&u) {
            return Err(Error::Domain(format!("parameter {u} outside [0, 1]")));
        }
    }
    Ok(())
}

/// Evaluates `data` at `params`, returning one row of science-variable
/// values (length `data.ctrl_pts().ncols()`). This is the n-dimensional
/// flattened-loop tensor contraction of the original `VolPt`: for every
/// combination of the `p(axis) + 1` nonvanishing basis indices on each
/// axis, the corresponding control point is weighted by the product of
/// per-axis basis values and the control point's own NURBS weight, and
/// accumulated along with the rational denominator `sum_i N_i * w_i`, by
/// which the accumulated numerator is finally divided (P&T eq. 4.1). This
/// division is unconditional rather than gated on a "weighted" flag: at the
/// all-ones weights a fixed (non-weighted) encode leaves in place, the
/// denominator is the basis partition-of-unity sum and the division is a
/// no-op up to floating-point rounding.
pub fn decode_point(data: &MfaData, params: &[f64]) -> Result<Array1<f64>> {
    let dom_dim = data.tmesh().dom_dim();
    validate_params(dom_dim, params)?;

    let t = locate_tensor(data, params)?;
    let p = data.tmesh().degrees();
    let nvars = t.ctrl_pts.ncols();

    let mut spans = Vec::with_capacity(dom_dim);
    let mut bases = Vec::with_capacity(dom_dim);
    for axis in 0..dom_dim {
        let knots = data.tmesh().knots(axis);
        let n = t.nctrl_pts[axis] - 1;
        let local_knots = &knots[t.knot_mins[axis]..=t.knot_maxs[axis]];
        let span = find_span(p[axis], n, local_knots, params[axis])?;
        let basis = basis_funs(p[axis], local_knots, span, params[axis]);
        spans.push(span);
        bases.push(basis);
    }

    let mut out = Array1::<f64>::zeros(nvars);
    let mut denom = 0.0f64;
    let degree_plus_one: Vec<usize> = p.iter().map(|&pi| pi + 1).collect();

    for offsets in MultiIndexIter::new(&degree_plus_one) {
        let mut basis_weight = 1.0f64;
        let mut ctrl_idx_parts = Vec::with_capacity(dom_dim);
        for axis in 0..dom_dim {
            basis_weight *= bases[axis][offsets[axis]];
            ctrl_idx_parts.push(spans[axis] - p[axis] + offsets[axis]);
        }
        let flat = crate::nd_iter::ravel_multi_index(&ctrl_idx_parts, &t.nctrl_pts);
        let rational_weight = basis_weight * t.weights[flat];
        denom += rational_weight;
        for v in 0..nvars {
            out[v] += rational_weight * t.ctrl_pts[[flat, v]];
        }
    }

    if denom.abs() > 1e-300 {
        out.mapv_inplace(|x| x / denom);
    }

    Ok(out)
}

/// Evaluates the mixed partial derivative given by `deriv` (order of
/// differentiation per axis) of `data` at `params`. Unlike [`decode_point`],
/// this does not rationalize against `t.weights`: a true NURBS derivative
/// needs the quotient rule applied to the numerator/denominator sweep above,
/// which would require propagating the denominator's own derivatives
/// through every mixed partial order; plain B-spline derivatives are
/// returned here regardless of whether the model was fit with weighting
/// enabled, a scope limitation recorded in `DESIGN.md`.
pub fn decode_point_deriv(data: &MfaData, params: &[f64], deriv: &[usize]) -> Result<Array1<f64>> {
    let dom_dim = data.tmesh().dom_dim();
    validate_params(dom_dim, params)?;
    if deriv.len() != dom_dim {
        return Err(Error::Shape(format!(
            "expected {dom_dim} derivative orders, got {}",
            deriv.len()
        )));
    }

    let t = locate_tensor(data, params)?;
    let p = data.tmesh().degrees();
    let nvars = t.ctrl_pts.ncols();

    let mut spans = Vec::with_capacity(dom_dim);
    let mut bases = Vec::with_capacity(dom_dim);
    for axis in 0..dom_dim {
        let knots = data.tmesh().knots(axis);
        let n = t.nctrl_pts[axis] - 1;
        let local_knots = &knots[t.knot_mins[axis]..=t.knot_maxs[axis]];
        let span = find_span(p[axis], n, local_knots, params[axis])?;
        let ders = deriv_basis_funs(p[axis], local_knots, span, params[axis], deriv[axis]);
        spans.push(span);
        bases.push(ders[deriv[axis]].clone());
    }

    let mut out = Array1::<f64>::zeros(nvars);
    let degree_plus_one: Vec<usize> = p.iter().map(|&pi| pi + 1).collect();

    for offsets in MultiIndexIter::new(&degree_plus_one) {
        let mut weight = 1.0f64;
        let mut ctrl_idx_parts = Vec::with_capacity(dom_dim);
        for axis in 0..dom_dim {
            weight *= bases[axis][offsets[axis]];
            ctrl_idx_parts.push(spans[axis] - p[axis] + offsets[axis]);
        }
        let flat = crate::nd_iter::ravel_multi_index(&ctrl_idx_parts, &t.nctrl_pts);
        for v in 0..nvars {
            out[v] += weight * t.ctrl_pts[[flat, v]];
        }
    }

    Ok(out)
}

/// Antiderivative of the `p + 1` basis functions nonvanishing at `span`,
/// via the standard B-spline integral identity: the antiderivative of
/// `N_{i,p}` is `((knots[i + p + 1] - knots[i]) / (p + 1)) * sum_{j <= i}
/// N_{j, p + 1}`. Returns the value of the definite integral of the curve
/// from `0` to `u`, for a 1-D curve with the given knots/control points.
fn integrate_axis_1d(p: usize, knots: &[f64], ctrl: &[f64], u: f64) -> Result<f64> {
    let n = ctrl.len() - 1;
    // degree-(p+1) extended knot vector obtained by clamping one extra knot
    // at each end, the standard device for the elevated-degree basis used
    // by the antiderivative identity.
    let mut ext_knots = Vec::with_capacity(knots.len() + 2);
    ext_knots.push(knots[0]);
    ext_knots.extend_from_slice(knots);
    ext_knots.push(knots[knots.len() - 1]);

    let ext_p = p + 1;
    let ext_n = n + 1;
    let span = find_span(ext_p, ext_n, &ext_knots, u)?;
    let basis = basis_funs(ext_p, &ext_knots, span, u);

    let mut coeffs = vec![0.0f64; ext_n + 1];
    let mut running = 0.0f64;
    for i in 0..=n {
        let scale = (knots[i + p + 1] - knots[i]) / f64::from(u32::try_from(p + 1).unwrap());
        running += scale * ctrl[i];
        coeffs[i] = running;
    }
    for i in (n + 1)..=ext_n {
        coeffs[i] = running;
    }

    let mut total = 0.0f64;
    for (j, &b) in basis.iter().enumerate() {
        let n_i = span + j;
        if n_i >= ext_p && n_i - ext_p <= ext_n {
            total += b * coeffs[n_i - ext_p];
        }
    }
    Ok(total)
}

/// Reduces `t`'s control net to a 1-D control polygon along `axis` by
/// evaluating ordinary B-spline basis on every other axis at `fixed`'s
/// coordinates and contracting: `reduced[i] = sum over other-axis
/// nonvanishing indices of (product of other-axis basis values) *
/// ctrl[i, others]`. Since the tensor-product basis is separable, the
/// resulting 1-D curve's value at any `u` along `axis` equals the full
/// surface's value at `(fixed[..axis], u, fixed[axis+1..])`, which is what
/// makes reusing [`integrate_axis_1d`] on it exact rather than approximate.
fn reduce_to_axis(data: &MfaData, t: &TensorProduct, p: &[usize], axis: usize, fixed: &[f64]) -> Result<Vec<f64>> {
    let dom_dim = p.len();
    let axes_other: Vec<usize> = (0..dom_dim).filter(|&a| a != axis).collect();

    let mut spans = vec![0usize; dom_dim];
    let mut bases: Vec<Vec<f64>> = vec![Vec::new(); dom_dim];
    for &a in &axes_other {
        let knots = data.tmesh().knots(a);
        let n = t.nctrl_pts[a] - 1;
        let local_knots = &knots[t.knot_mins[a]..=t.knot_maxs[a]];
        let span = find_span(p[a], n, local_knots, fixed[a])?;
        bases[a] = basis_funs(p[a], local_knots, span, fixed[a]);
        spans[a] = span;
    }

    let other_degree_plus_one: Vec<usize> = axes_other.iter().map(|&a| p[a] + 1).collect();
    let n_axis = t.nctrl_pts[axis];
    let mut reduced = vec![0.0f64; n_axis];

    for other_offsets in MultiIndexIter::new(&other_degree_plus_one) {
        let mut weight = 1.0f64;
        let mut ctrl_idx = vec![0usize; dom_dim];
        for (k, &a) in axes_other.iter().enumerate() {
            weight *= bases[a][other_offsets[k]];
            ctrl_idx[a] = spans[a] - p[a] + other_offsets[k];
        }
        for i in 0..n_axis {
            ctrl_idx[axis] = i;
            let flat = crate::nd_iter::ravel_multi_index(&ctrl_idx, &t.nctrl_pts);
            reduced[i] += weight * t.ctrl_pts[[flat, 0]];
        }
    }

    Ok(reduced)
}

/// Closed-form definite integral, from `lo` to `hi`, of the first science
/// variable along `axis` with every other axis held fixed at `fixed`'s
/// coordinates — the n-dimensional generalization of [`integrate_axis_1d`]:
/// ordinary basis is evaluated on every non-integration axis (`reduce_to_axis`)
/// to collapse the tensor-product control net to a 1-D polygon along `axis`,
/// then the same antiderivative identity used for `dom_dim == 1` is applied
/// to that polygon.
fn integrate_axis_aligned(data: &MfaData, t: &TensorProduct, p: &[usize], axis: usize, fixed: &[f64], lo: f64, hi: f64) -> Result<f64> {
    let reduced = reduce_to_axis(data, t, p, axis, fixed)?;
    let knots = data.tmesh().knots(axis);
    let local_knots = &knots[t.knot_mins[axis]..=t.knot_maxs[axis]];
    let at_hi = integrate_axis_1d(p[axis], local_knots, &reduced, hi)?;
    let at_lo = integrate_axis_1d(p[axis], local_knots, &reduced, lo)?;
    Ok(at_hi - at_lo)
}

/// Integrates the first science variable along the straight ray from `a` to
/// `b` (both length `dom_dim`, in `[0, 1]^dom_dim`), by a per-axis
/// antiderivative evaluation when the ray is axis-aligned (exact for any
/// `dom_dim`, via [`integrate_axis_aligned`]), or a composite quadrature
/// over the curve otherwise. `fixed_length` scales the result by the
/// Euclidean length of the ray in parameter space; otherwise the raw
/// parameter-space integral is returned.
pub fn integrate_axis_ray(data: &MfaData, a: &[f64], b: &[f64], fixed_length: bool) -> Result<f64> {
    let dom_dim = data.tmesh().dom_dim();
    validate_params(dom_dim, a)?;
    validate_params(dom_dim, b)?;

    let t = locate_tensor(data, a)?;
    let p = data.tmesh().degrees();

    let axis_aligned = (0..dom_dim).filter(|&axis| (a[axis] - b[axis]).abs() > 1e-12).count() == 1;

    let raw_integral = if axis_aligned {
        let axis = (0..dom_dim).find(|&axis| (a[axis] - b[axis]).abs() > 1e-12).unwrap();
        integrate_axis_aligned(data, t, p, axis, a, a[axis], b[axis])?
    } else {
        simpson_quadrature(data, a, b)?
    };

    if fixed_length {
        let length: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt();
        Ok(raw_integral * length)
    } else {
        Ok(raw_integral)
    }
}

/// Composite Simpson's rule along the straight ray from `a` to `b`,
/// decoding the first science variable at each quadrature node. Used when
/// the ray is not axis-aligned and the closed-form antiderivative identity
/// does not directly apply.
fn simpson_quadrature(data: &MfaData, a: &[f64], b: &[f64]) -> Result<f64> {
    const SEGMENTS: usize = 64; // even, for Simpson's rule
    let dom_dim = a.len();
    let h = 1.0 / f64::from(u32::try_from(SEGMENTS).unwrap());

    let eval_at = |t: f64| -> Result<f64> {
        let params: Vec<f64> = (0..dom_dim).map(|axis| a[axis] + t * (b[axis] - a[axis])).collect();
        let clamped: Vec<f64> = params.iter().map(|&u| u.clamp(0.0, 1.0)).collect();
        Ok(decode_point(data, &clamped)?[0])
    };

    let mut sum = eval_at(0.0)? + eval_at(1.0)?;
    for i in 1..SEGMENTS {
        let t = f64::from(u32::try_from(i).unwrap()) * h;
        let weight = if i % 2 == 0 { 2.0 } else { 4.0 };
        sum += weight * eval_at(t)?;
    }
    Ok(sum * h / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::MfaInfo;
    use crate::model::Model;
    use crate::point_set::PointSet;
    use float_cmp::assert_approx_eq;
    use ndarray::Array2;

    fn sine_points() -> PointSet {
        let n = 41;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = (std::f64::consts::PI * x).sin();
        }
        PointSet::new(domain, vec![n], 1).unwrap()
    }

    #[test]
    fn decode_matches_samples_closely() {
        let points = sine_points();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 15);
        let model = Model::encode_fixed(&points, &info).unwrap();

        for i in [0, 10, 20, 30, 40] {
            let x = points.domain()[[i, 0]];
            let expected = points.domain()[[i, 1]];
            let decoded = model.decode(&[x]).unwrap()[0];
            assert_approx_eq!(f64, decoded, expected, epsilon = 5e-2);
        }
    }

    #[test]
    fn integral_of_constant_one_over_whole_domain_is_length() {
        let n = 9;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = 1.0;
        }
        let points = PointSet::new(domain, vec![n], 1).unwrap();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);
        let model = Model::encode_fixed(&points, &info).unwrap();

        let integral = model.integrate_ray(&[0.0], &[1.0], false).unwrap();
        assert_approx_eq!(f64, integral, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn rejects_out_of_domain_params() {
        let points = sine_points();
        let info = MfaInfo::new(1, false);
        let model = Model::encode_fixed(&points, &info).unwrap();
        assert!(model.decode(&[1.5]).is_err());
    }

    #[test]
    fn decode_point_is_invariant_to_uniform_weight_scaling() {
        let n = 9;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = x * x;
        }
        let points = PointSet::new(domain, vec![n], 1).unwrap();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);
        let (_, vars) = crate::encoder::encode_fixed(&points, &info).unwrap();
        let mut data = vars.into_iter().next().unwrap();

        let before = decode_point(&data, &[0.37]).unwrap();
        for w in &mut data.tmesh_mut().tensor_mut(0).unwrap().weights {
            *w *= 3.5;
        }
        let after = decode_point(&data, &[0.37]).unwrap();

        assert_approx_eq!(f64, before[0], after[0], epsilon = 1e-9);
    }

    #[test]
    fn axis_aligned_ray_integral_is_exact_in_two_dimensions() {
        let n = 9;
        let mut domain = Array2::<f64>::zeros((n * n, 3));
        for i in 0..n {
            for j in 0..n {
                let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
                let y = f64::from(u32::try_from(j).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
                let row = i * n + j;
                domain[[row, 0]] = x;
                domain[[row, 1]] = y;
                domain[[row, 2]] = 2.0 * x + 1.0;
            }
        }
        let points = PointSet::new(domain, vec![n, n], 2).unwrap();
        let mut info = MfaInfo::new(2, false);
        info.set_degree(0, 3);
        info.set_degree(1, 3);
        info.set_nctrl_pts(0, 6);
        info.set_nctrl_pts(1, 6);
        let model = Model::encode_fixed(&points, &info).unwrap();

        // integrating 2x+1 over x in [0, 1] at fixed y gives 2*(1/2) + 1 = 2.0,
        // independent of y; this is now the closed-form per-axis antiderivative
        // (not composite Simpson quadrature) since the ray is axis-aligned.
        let value = model.integrate_ray(&[0.0, 0.5], &[1.0, 0.5], false).unwrap();
        assert_approx_eq!(f64, value, 2.0, epsilon = 1e-6);
    }
}
