//! Two-stage ray model builder (§4.8): clips a ray against the unit
//! hypercube domain, integrates the underlying model's first science
//! variable along the clipped segment, and (optionally) re-encodes a
//! family of such integrals into a secondary `(t, rho, alpha)` model.
//!
//! Grounded on the line-clipping case table of the original `rayblock`
//! driver: a ray is parameterized as `a + s * (b - a)` for `s` in `[0, 1]`
//! and clipped to `s` in `[s_lo, s_hi]` via the Liang-Barsky algorithm
//! (the same per-axis slab test the original's case table encodes
//! explicitly per dimension).

use crate::decoder;
use crate::error::{Error, Result};
use crate::info::MfaInfo;
use crate::model::Model;
use crate::point_set::PointSet;
use ndarray::Array2;

/// The result of sampling a single ray against a model.
///
/// The original fixed-length ray driver encodes "this ray missed the
/// domain" with a sentinel value of `1000.0`; per the Open Question
/// decision recorded in `DESIGN.md`, this crate instead uses an explicit
/// `in_domain` flag so callers cannot mistake a sentinel for a real,
/// unusually large integral.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaySample {
    /// The integral of the model's first science variable along the
    /// portion of the ray that lies inside `[0, 1]^dom_dim`. Zero if the
    /// ray never enters the domain.
    pub value: f64,
    /// Whether the ray intersects the domain at all.
    pub in_domain: bool,
}

/// Clips the ray `a + s * (b - a)`, `s` in `[0, 1]`, against `[0, 1]^d`
/// using the Liang-Barsky slab test, returning the entry/exit parameters
/// `(s_lo, s_hi)` if the ray intersects the box at all.
fn clip_to_unit_box(a: &[f64], b: &[f64]) -> Option<(f64, f64)> {
    let mut s_lo = 0.0f64;
    let mut s_hi = 1.0f64;

    for axis in 0..a.len() {
        let d = b[axis] - a[axis];
        if d.abs() < 1e-300 {
            if a[axis] < 0.0 || a[axis] > 1.0 {
                return None;
            }
            continue;
        }
        let mut t0 = (0.0 - a[axis]) / d;
        let mut t1 = (1.0 - a[axis]) / d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        s_lo = s_lo.max(t0);
        s_hi = s_hi.min(t1);
        if s_lo > s_hi {
            return None;
        }
    }

    Some((s_lo, s_hi))
}

/// Samples the ray from `a` to `b` against `model`, clipping to the domain
/// first and integrating only the clipped portion.
pub fn sample_ray(model: &Model, a: &[f64], b: &[f64]) -> Result<RaySample> {
    let dom_dim = model.geometry().tmesh().dom_dim();
    if a.len() != dom_dim || b.len() != dom_dim {
        return Err(Error::Shape(format!(
            "ray endpoints must have {dom_dim} coordinates"
        )));
    }

    let Some((s_lo, s_hi)) = clip_to_unit_box(a, b) else {
        return Ok(RaySample { value: 0.0, in_domain: false });
    };

    let clipped_a: Vec<f64> = (0..dom_dim).map(|axis| a[axis] + s_lo * (b[axis] - a[axis])).collect();
    let clipped_b: Vec<f64> = (0..dom_dim).map(|axis| a[axis] + s_hi * (b[axis] - a[axis])).collect();

    let clipped_a: Vec<f64> = clipped_a.iter().map(|&u| u.clamp(0.0, 1.0)).collect();
    let clipped_b: Vec<f64> = clipped_b.iter().map(|&u| u.clamp(0.0, 1.0)).collect();

    let value = if model.variables().is_empty() {
        0.0
    } else {
        decoder::integrate_axis_ray(&model.variables()[0], &clipped_a, &clipped_b, false)?
    };

    Ok(RaySample { value, in_domain: true })
}

/// One ray description in `(t, rho, alpha)` space: `t` is the offset along
/// the rotation axis, `rho` is the perpendicular distance of the ray from
/// the domain center, and `alpha` is the rotation angle, following the
/// two-stage ray model's parameterization of a family of parallel-beam
/// rays through a 2-D geometry+variable model.
#[derive(Clone, Copy, Debug)]
pub struct RayDescriptor {
    /// Offset along the rotation axis.
    pub t: f64,
    /// Perpendicular distance from the domain center.
    pub rho: f64,
    /// Rotation angle, in radians.
    pub alpha: f64,
}

impl RayDescriptor {
    /// Converts this descriptor into a ray endpoint pair crossing the unit
    /// square geometry domain of `base`, centered at `(0.5, 0.5)`.
    #[must_use]
    pub fn to_endpoints(self) -> (Vec<f64>, Vec<f64>) {
        let cx = 0.5 + self.rho * self.alpha.cos();
        let cy = 0.5 + self.rho * self.alpha.sin();
        let dx = -self.alpha.sin();
        let dy = self.alpha.cos();
        let half = 2.0; // long enough to guarantee crossing the unit square
        let a = vec![cx - half * dx + self.t * dx, cy - half * dy + self.t * dy];
        let b = vec![cx + half * dx + self.t * dx, cy + half * dy + self.t * dy];
        (a, b)
    }
}

/// Builds the secondary `(t, rho, alpha)` model: samples `base` along every
/// ray in `descriptors`, arranged as a tensor-product grid over `t`, `rho`,
/// and `alpha` (so `descriptors.len()` must equal the product of
/// `nt * nrho * nalpha` in that row-major order), and fits an `MfaInfo`
/// model over the resulting integrals.
pub fn build_ray_model(base: &Model, descriptors: &[RayDescriptor], shape: [usize; 3], info: &MfaInfo) -> Result<Model> {
    let expected = shape[0] * shape[1] * shape[2];
    if descriptors.len() != expected {
        return Err(Error::Shape(format!(
            "expected {expected} ray descriptors for shape {shape:?}, got {}",
            descriptors.len()
        )));
    }
    if info.dom_dim() != 3 {
        return Err(Error::Shape("ray model requires a 3-dimensional MfaInfo".to_string()));
    }

    let mut domain = Array2::<f64>::zeros((expected, 4));
    for (row, d) in descriptors.iter().enumerate() {
        let (a, b) = d.to_endpoints();
        let sample = sample_ray(base, &a, &b)?;
        domain[[row, 0]] = d.t;
        domain[[row, 1]] = d.rho;
        domain[[row, 2]] = d.alpha;
        domain[[row, 3]] = if sample.in_domain { sample.value } else { 0.0 };
    }

    let points = PointSet::new(domain, shape.to_vec(), 3)?;
    Model::encode_fixed(&points, info)
}
