//! B-spline basis function evaluation: span location and the Cox-de Boor
//! recurrence, including the T-mesh-aware variant that skips knots whose
//! refinement level is coarser than the tensor being evaluated.

use crate::error::{Error, Result};

/// Finds the knot span index `i` such that `u` lies in `[knots[i], knots[i + 1])`,
/// closed at both ends only when `u` equals the last knot. Binary search,
/// algorithm 2.1 of P&T p. 68. `n` is the number of control point spans
/// (`nctrl_pts - 1`); the returned index is always in `[p, n]`.
pub fn find_span(p: usize, n: usize, knots: &[f64], u: f64) -> Result<usize> {
    if !(0.0..=1.0).contains(&u) {
        return Err(Error::Domain(format!("parameter {u} outside [0, 1]")));
    }
    if knots.len() != n + p + 2 {
        return Err(Error::Shape(format!(
            "knot vector has {} entries, expected {}",
            knots.len(),
            n + p + 2
        )));
    }

    if u >= knots[n + 1] {
        return Ok(n);
    }

    let mut low = p;
    let mut high = n + 1;
    let mut mid = (low + high) / 2;
    while u < knots[mid] || u >= knots[mid + 1] {
        if u < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    Ok(mid)
}

/// Finds the knot span restricted to a T-mesh tensor's local knot range,
/// skipping knots that belong to a finer refinement level than `level`.
/// `knots`/`levels` are the global, crate-wide knot vector and its parallel
/// per-knot refinement levels for this axis; `lo`/`hi` bound the tensor's
/// local knot indices within that global vector.
pub fn find_span_tmesh(
    p: usize,
    knots: &[f64],
    levels: &[usize],
    level: usize,
    lo: usize,
    hi: usize,
    u: f64,
) -> Result<usize> {
    if !(0.0..=1.0).contains(&u) {
        return Err(Error::Domain(format!("parameter {u} outside [0, 1]")));
    }
    if knots.len() != levels.len() {
        return Err(Error::Shape(
            "knot vector and level vector have different lengths".to_string(),
        ));
    }

    let matching: Vec<usize> = (lo..=hi).filter(|&i| levels[i] <= level).collect();
    if matching.len() < 2 {
        return Err(Error::Invariant(
            "tensor has fewer than two knots at its own level or coarser".to_string(),
        ));
    }

    if u >= knots[matching[matching.len() - 1]] {
        return Ok(matching[matching.len() - p - 1 - 1 + 1]);
    }

    for w in matching.windows(2) {
        if u >= knots[w[0]] && u < knots[w[1]] {
            return Ok(w[0]);
        }
    }
    Err(Error::Invariant(format!(
        "parameter {u} not contained in tensor's local knot range"
    )))
}

/// Computes the `p + 1` nonvanishing basis function values
/// `[N_{span - p}, .., N_{span}]` at parameter `u`. Algorithm 2.2 of P&T p.
/// 70. The returned vector is indexed `0..=p`, where index `j` corresponds
/// to basis function `N_{span - p + j}`.
#[must_use]
pub fn basis_funs(p: usize, knots: &[f64], span: usize, u: f64) -> Vec<f64> {
    let mut n = vec![0.0f64; p + 1];
    n[0] = 1.0;
    let mut left = vec![0.0f64; p + 1];
    let mut right = vec![0.0f64; p + 1];

    for j in 1..=p {
        left[j] = u - knots[span + 1 - j];
        right[j] = knots[span + j] - u;
        let mut saved = 0.0f64;
        for r in 0..j {
            let temp = n[r] / (right[r + 1] + left[j - r]);
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }

    n
}

/// Computes basis function values and their first `num_derivs` derivatives,
/// following the nonrational B-spline derivative recurrence of P&T
/// algorithm 2.3. Returns a `(num_derivs + 1) x (p + 1)` matrix whose row
/// `k` holds the `k`-th derivative of each of the `p + 1` nonvanishing
/// basis functions, indexed identically to [`basis_funs`].
#[must_use]
pub fn deriv_basis_funs(p: usize, knots: &[f64], span: usize, u: f64, num_derivs: usize) -> Vec<Vec<f64>> {
    let num_derivs = num_derivs.min(p);

    let mut ndu = vec![vec![0.0f64; p + 1]; p + 1];
    ndu[0][0] = 1.0;
    let mut left = vec![0.0f64; p + 1];
    let mut right = vec![0.0f64; p + 1];

    for j in 1..=p {
        left[j] = u - knots[span + 1 - j];
        right[j] = knots[span + j] - u;
        let mut saved = 0.0f64;
        for r in 0..j {
            ndu[j][r] = right[r + 1] + left[j - r];
            let temp = ndu[r][j - 1] / ndu[j][r];
            ndu[r][j] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        ndu[j][j] = saved;
    }

    let mut ders = vec![vec![0.0f64; p + 1]; num_derivs + 1];
    for j in 0..=p {
        ders[0][j] = ndu[j][p];
    }

    let mut a = vec![vec![0.0f64; p + 1]; 2];
    for r in 0..=p {
        let mut s1 = 0usize;
        let mut s2 = 1usize;
        a[0][0] = 1.0;

        for k in 1..=num_derivs {
            let mut d = 0.0f64;
            let rk = r as isize - k as isize;
            let pk = p - k;

            if r >= k {
                a[s2][0] = a[s1][0] / ndu[pk + 1][(rk.max(0)) as usize];
                d = a[s2][0] * ndu[(rk.max(0)) as usize][pk];
            }

            let j1 = if rk >= -1 { 1 } else { (-rk) as usize };
            let j2 = if r as isize - 1 <= pk as isize {
                k - 1
            } else {
                p - r
            };

            for j in j1..=j2 {
                a[s2][j] = (a[s1][j] - a[s1][j - 1]) / ndu[pk + 1][(rk + j as isize) as usize];
                d += a[s2][j] * ndu[(rk + j as isize) as usize][pk];
            }

            if r <= pk {
                a[s2][k] = -a[s1][k - 1] / ndu[pk + 1][r];
                d += a[s2][k] * ndu[r][pk];
            }

            ders[k][r] = d;
            std::mem::swap(&mut s1, &mut s2);
        }
    }

    let mut fact = p as f64;
    for k in 1..=num_derivs {
        for j in 0..=p {
            ders[k][j] *= fact;
        }
        fact *= (p - k) as f64;
    }

    ders
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn clamped_knots(p: usize, nctrl: usize) -> Vec<f64> {
        crate::knots::uniform_knots(p, nctrl)
    }

    #[test]
    fn basis_funs_sum_to_one() {
        let p = 3;
        let knots = clamped_knots(p, 7);
        let n = 6;
        for i in 0..=20 {
            let u = f64::from(i) / 20.0;
            let span = find_span(p, n, &knots, u).unwrap();
            let vals = basis_funs(p, &knots, span, u);
            let sum: f64 = vals.iter().sum();
            assert_approx_eq!(f64, sum, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn find_span_endpoints() {
        let p = 3;
        let knots = clamped_knots(p, 7);
        assert_eq!(find_span(p, 6, &knots, 0.0).unwrap(), p);
        assert_eq!(find_span(p, 6, &knots, 1.0).unwrap(), 6);
    }

    #[test]
    fn find_span_rejects_out_of_domain() {
        let p = 3;
        let knots = clamped_knots(p, 7);
        assert!(find_span(p, 6, &knots, 1.5).is_err());
        assert!(find_span(p, 6, &knots, -0.1).is_err());
    }

    #[test]
    fn zeroth_derivative_matches_basis_funs() {
        let p = 3;
        let knots = clamped_knots(p, 7);
        let n = 6;
        let u = 0.42;
        let span = find_span(p, n, &knots, u).unwrap();
        let plain = basis_funs(p, &knots, span, u);
        let ders = deriv_basis_funs(p, &knots, span, u, 2);
        for (a, b) in plain.iter().zip(&ders[0]) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-10);
        }
    }
}
