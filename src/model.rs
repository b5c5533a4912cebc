//! [`MfaData`] (one T-mesh-backed encoding of either the domain geometry or
//! a single science variable) and [`Model`] (a geometry `MfaData` paired
//! with one `MfaData` per science variable) — the external interface of
//! this crate (§6).

use crate::adaptive;
use crate::decoder;
use crate::encoder;
use crate::error::{Error, Result};
use crate::info::MfaInfo;
use crate::knots::KnotVector;
use crate::point_set::PointSet;
use crate::ray_model::RaySample;
use crate::tmesh::Tmesh;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Magic header written before every persisted [`Model`], so a malformed or
/// foreign file is rejected before any field is deserialized.
const MAGIC: &[u8; 4] = b"MFA1";
/// Binary format version, bumped whenever the on-disk layout changes.
const FORMAT_VERSION: u32 = 1;

/// One NURBS encoding over a hierarchical T-mesh: either the domain
/// geometry (one column per domain axis) or a single science variable (one
/// column).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MfaData {
    tmesh: Tmesh,
}

impl MfaData {
    /// Builds a single-tensor `MfaData` directly from a clamped knot vector
    /// per axis and a flat (row-major) control-point matrix, as produced by
    /// the fixed encoder.
    pub fn new(degree: Vec<usize>, knots: Vec<KnotVector>, ctrl_pts: Array2<f64>) -> Result<Self> {
        let nvars = ctrl_pts.ncols();
        let mut tmesh = Tmesh::new(degree, knots, nvars)?;
        let total_expected: usize = tmesh.tensors()[0].nctrl_pts.iter().product();
        if ctrl_pts.nrows() != total_expected {
            return Err(Error::Shape(format!(
                "control point matrix has {} rows, expected {total_expected}",
                ctrl_pts.nrows()
            )));
        }
        let t = tmesh.tensor_mut(0)?;
        t.ctrl_pts = ctrl_pts;
        Ok(Self { tmesh })
    }

    /// The T-mesh backing this encoding.
    #[must_use]
    pub fn tmesh(&self) -> &Tmesh {
        &self.tmesh
    }

    /// Mutable access to the T-mesh, used by the adaptive encoder to insert
    /// knots and tensors between scan/refine rounds.
    pub fn tmesh_mut(&mut self) -> &mut Tmesh {
        &mut self.tmesh
    }

    /// Convenience accessor for the base tensor's control points, valid
    /// only while the T-mesh has not yet been refined beyond a single
    /// tensor (true for every model produced by the fixed encoder).
    #[must_use]
    pub fn ctrl_pts(&self) -> &Array2<f64> {
        &self.tmesh.tensors()[0].ctrl_pts
    }
}

/// A complete multivariate functional approximation: a geometry encoding
/// and one encoding per science variable, sharing no state but evaluated
/// together at every decode call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    geometry: MfaData,
    variables: Vec<MfaData>,
}

/// Summary of the error between a model and a reference point set, as
/// returned by [`Model::range_error`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeError {
    /// Largest absolute error observed, over every sample and variable.
    pub max_abs_error: f64,
    /// Root-mean-square error, over every sample and variable.
    pub rms_error: f64,
}

impl Model {
    /// Encodes `points` with a single, non-adaptive pass, per §4.5.
    pub fn encode_fixed(points: &PointSet, info: &MfaInfo) -> Result<Self> {
        let (geometry, variables) = encoder::encode_fixed(points, info)?;
        Ok(Self { geometry, variables })
    }

    /// Encodes `points` with the adaptive scan/refine loop of §4.6, starting
    /// from a fixed-encoder initial fit.
    pub fn encode_adaptive(points: &PointSet, info: &MfaInfo) -> Result<Self> {
        let (geometry, variables) = encoder::encode_fixed(points, info)?;
        let mut model = Self { geometry, variables };
        adaptive::refine(&mut model, points, info)?;
        Ok(model)
    }

    /// Geometry encoding.
    #[must_use]
    pub fn geometry(&self) -> &MfaData {
        &self.geometry
    }

    /// Per-variable encodings.
    #[must_use]
    pub fn variables(&self) -> &[MfaData] {
        &self.variables
    }

    /// Mutable access used by the adaptive refinement loop.
    pub(crate) fn geometry_mut(&mut self) -> &mut MfaData {
        &mut self.geometry
    }

    /// Mutable access used by the adaptive refinement loop.
    pub(crate) fn variables_mut(&mut self) -> &mut [MfaData] {
        &mut self.variables
    }

    /// Evaluates every science variable at `params` (length `dom_dim`).
    pub fn decode(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.variables
            .iter()
            .map(|v| decoder::decode_point(v, params).map(|row| row[0]))
            .collect()
    }

    /// Evaluates every science variable at each row of `params` (one row per
    /// query point, `dom_dim` columns), in parallel across rows via rayon —
    /// the per-variable loop inside [`Self::decode`] is cheap enough that
    /// parallelizing across query points, rather than across variables,
    /// is what pays off for the typical large-point-count caller.
    pub fn decode_many(&self, params: &Array2<f64>) -> Result<Vec<Vec<f64>>> {
        let rows: Vec<_> = params.axis_iter(ndarray::Axis(0)).collect();
        rows.into_par_iter()
            .map(|row| {
                let row = row.as_slice().ok_or_else(|| Error::Shape("query matrix rows must be contiguous".to_string()))?;
                self.decode(row)
            })
            .collect()
    }

    /// Evaluates the mixed partial derivative given by `deriv` (one entry
    /// per domain axis, the order of differentiation along that axis) of
    /// every science variable at `params`.
    pub fn decode_deriv(&self, params: &[f64], deriv: &[usize]) -> Result<Vec<f64>> {
        self.variables
            .iter()
            .map(|v| decoder::decode_point_deriv(v, params, deriv).map(|row| row[0]))
            .collect()
    }

    /// Integrates the first science variable along the ray from `a` to `b`
    /// (both length `dom_dim`), per §4.8/§4.7's antiderivative identity.
    /// `fixed_length` selects whether the returned value is scaled by the
    /// ray's Euclidean length or left as a raw parameter-space integral.
    pub fn integrate_ray(&self, a: &[f64], b: &[f64], fixed_length: bool) -> Result<f64> {
        self.variables.first().map_or_else(
            || Err(Error::Shape("model has no science variables to integrate".to_string())),
            |v| decoder::integrate_axis_ray(v, a, b, fixed_length),
        )
    }

    /// Builds a two-stage ray model sample for the ray from `a` to `b`: a
    /// dedicated `in_domain` flag takes the place of the original's
    /// fixed-length sentinel value (see `DESIGN.md`).
    pub fn ray_sample(&self, a: &[f64], b: &[f64]) -> Result<RaySample> {
        crate::ray_model::sample_ray(self, a, b)
    }

    /// Compares this model's decoded values against `points` and reports
    /// the maximum and RMS error across every sample and variable.
    pub fn range_error(&self, points: &PointSet) -> Result<RangeError> {
        let dom_dim = points.dom_dim();
        let nvars = points.nvars();
        if self.variables.len() != nvars {
            return Err(Error::Shape(format!(
                "model has {} variables but point set has {nvars}",
                self.variables.len()
            )));
        }

        let mut max_abs = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0usize;

        for row in points.domain().rows() {
            let params: Vec<f64> = (0..dom_dim)
                .map(|axis| {
                    let lo = points.mins()[axis];
                    let hi = points.maxs()[axis];
                    if (hi - lo).abs() < 1e-300 {
                        0.0
                    } else {
                        (row[axis] - lo) / (hi - lo)
                    }
                })
                .collect();

            let decoded = self.decode(&params)?;
            for (v, &decoded_value) in decoded.iter().enumerate() {
                let actual = row[dom_dim + v];
                let err = (decoded_value - actual).abs();
                max_abs = max_abs.max(err);
                sum_sq += err * err;
                count += 1;
            }
        }

        Ok(RangeError {
            max_abs_error: max_abs,
            rms_error: if count == 0 { 0.0 } else { (sum_sq / f64::from(u32::try_from(count).unwrap())).sqrt() },
        })
    }

    /// Serializes this model to `w` behind a versioned magic header.
    pub fn write(&self, w: &mut impl std::io::Write) -> Result<()> {
        w.write_all(MAGIC).map_err(|e| Error::Other(e.into()))?;
        w.write_all(&FORMAT_VERSION.to_le_bytes()).map_err(|e| Error::Other(e.into()))?;
        bincode::serialize_into(w, self).map_err(|e| Error::Other(anyhow::anyhow!(e)))
    }

    /// Deserializes a model previously written by [`Model::write`].
    pub fn read(r: &mut impl std::io::Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|e| Error::Other(e.into()))?;
        if &magic != MAGIC {
            return Err(Error::Invariant("not an MFA model file".to_string()));
        }
        let mut version_bytes = [0u8; 4];
        r.read_exact(&mut version_bytes).map_err(|e| Error::Other(e.into()))?;
        let version = u32::from_le_bytes(version_bytes);
        if version != FORMAT_VERSION {
            return Err(Error::Invariant(format!(
                "unsupported model file format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        bincode::deserialize_from(r).map_err(|e| Error::Other(anyhow::anyhow!(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::MfaInfo;
    use ndarray::Array2;

    fn line_points() -> PointSet {
        let n = 9;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
            domain[[i, 0]] = x;
            domain[[i, 1]] = 3.0 * x - 1.0;
        }
        PointSet::new(domain, vec![n], 1).unwrap()
    }

    #[test]
    fn round_trips_through_serialization() {
        let points = line_points();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);
        let model = Model::encode_fixed(&points, &info).unwrap();

        let mut buf = Vec::new();
        model.write(&mut buf).unwrap();
        let restored = Model::read(&mut &buf[..]).unwrap();

        let a = model.decode(&[0.3]).unwrap();
        let b = restored.decode(&[0.3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_many_matches_sequential_decode() {
        let points = line_points();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);
        let model = Model::encode_fixed(&points, &info).unwrap();

        let mut queries = Array2::<f64>::zeros((4, 1));
        for (i, &x) in [0.0, 0.2, 0.6, 1.0].iter().enumerate() {
            queries[[i, 0]] = x;
        }
        let batched = model.decode_many(&queries).unwrap();
        for (i, &x) in [0.0, 0.2, 0.6, 1.0].iter().enumerate() {
            let single = model.decode(&[x]).unwrap();
            assert_eq!(batched[i], single);
        }
    }

    #[test]
    fn range_error_is_small_for_a_line() {
        let points = line_points();
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 3);
        info.set_nctrl_pts(0, 9);
        let model = Model::encode_fixed(&points, &info).unwrap();
        let err = model.range_error(&points).unwrap();
        assert!(err.max_abs_error < 1e-6, "{}", err.max_abs_error);
    }
}
