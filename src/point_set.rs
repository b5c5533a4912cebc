//! [`PointSet`]: the scattered or gridded samples an encoder consumes.

use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A tensor-product grid of samples of `f: [0, 1]^d -> R^r`.
///
/// `domain` stores the full geometry + variable coordinates of every sample
/// (`dom_dim + nvars` columns, one row per sample, ordered so the first
/// domain axis varies fastest). `ndom_pts` gives the number of samples along
/// each domain axis; the number of rows in `domain` must equal their
/// product.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointSet {
    domain: Array2<f64>,
    ndom_pts: Vec<usize>,
    dom_dim: usize,
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl PointSet {
    /// Builds a `PointSet` from a flat sample matrix and the per-axis grid
    /// extents. Columns `0..dom_dim` of `domain` are geometry coordinates;
    /// the remaining columns are function values.
    pub fn new(domain: Array2<f64>, ndom_pts: Vec<usize>, dom_dim: usize) -> Result<Self> {
        let total: usize = ndom_pts.iter().product();
        if domain.nrows() != total {
            return Err(Error::Shape(format!(
                "domain has {} rows but ndom_pts {:?} implies {total}",
                domain.nrows(),
                ndom_pts
            )));
        }
        if dom_dim != ndom_pts.len() {
            return Err(Error::Shape(format!(
                "dom_dim ({dom_dim}) does not match ndom_pts length ({})",
                ndom_pts.len()
            )));
        }
        if domain.ncols() < dom_dim {
            return Err(Error::Shape(format!(
                "domain has only {} columns, fewer than dom_dim ({dom_dim})",
                domain.ncols()
            )));
        }

        let mut mins = vec![f64::INFINITY; dom_dim];
        let mut maxs = vec![f64::NEG_INFINITY; dom_dim];
        for row in domain.rows() {
            for k in 0..dom_dim {
                mins[k] = mins[k].min(row[k]);
                maxs[k] = maxs[k].max(row[k]);
            }
        }

        Ok(Self {
            domain,
            ndom_pts,
            dom_dim,
            mins,
            maxs,
        })
    }

    /// The full sample matrix: geometry columns followed by variable columns.
    #[must_use]
    pub fn domain(&self) -> &Array2<f64> {
        &self.domain
    }

    /// Number of samples along each domain axis.
    #[must_use]
    pub fn ndom_pts(&self) -> &[usize] {
        &self.ndom_pts
    }

    /// Number of domain (geometry) axes.
    #[must_use]
    pub fn dom_dim(&self) -> usize {
        self.dom_dim
    }

    /// Number of science-variable (range) columns.
    #[must_use]
    pub fn nvars(&self) -> usize {
        self.domain.ncols() - self.dom_dim
    }

    /// Per-axis minimum geometry coordinate.
    #[must_use]
    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    /// Per-axis maximum geometry coordinate.
    #[must_use]
    pub fn maxs(&self) -> &[f64] {
        &self.maxs
    }

    /// Total number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domain.nrows()
    }

    /// Whether this point set has no samples; only possible if `ndom_pts`
    /// contains a zero extent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domain.nrows() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sample_grid() -> PointSet {
        let n = 5;
        let mut domain = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let x = f64::from(u32::try_from(i).unwrap()) / 4.0;
            domain[[i, 0]] = x;
            domain[[i, 1]] = x.sin();
        }
        PointSet::new(domain, vec![n], 1).unwrap()
    }

    #[test]
    fn computes_bounding_box() {
        let ps = sample_grid();
        assert_eq!(ps.mins(), &[0.0]);
        assert_eq!(ps.maxs(), &[1.0]);
        assert_eq!(ps.nvars(), 1);
    }

    #[test]
    fn rejects_shape_mismatch() {
        let domain = Array2::<f64>::zeros((4, 2));
        assert!(PointSet::new(domain, vec![5], 1).is_err());
    }
}
