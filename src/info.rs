//! [`MfaInfo`]: the builder-style configuration struct callers fill in
//! before encoding, in the shape of this crate's earlier subgrid parameter
//! structs — small setters over plain fields rather than a parsed
//! configuration file, since the core library takes no part in argument
//! parsing or file I/O.

use serde::{Deserialize, Serialize};

/// Parameterization method used to map input samples to `[0, 1]` curve
/// parameters (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamMethod {
    /// Chord-length parameterization (P&T eq. 9.3).
    ChordLength,
    /// Domain-ratio / uniform parameterization.
    Domain,
}

/// Knot placement method used to build the initial clamped knot vector
/// (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnotConstructionMethod {
    /// Averaged interior knots (P&T eq. 9.68/9.69).
    Averaged,
    /// Uniformly spaced interior knots.
    Uniform,
}

/// Regularization stencil applied to the fixed encoder's normal equations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizationMode {
    /// No regularization term.
    None,
    /// Second-derivative finite-difference penalty.
    SecondDerivative,
    /// Combined first- and second-derivative finite-difference penalty.
    FirstAndSecondDerivative,
}

/// Per-run configuration for encoding a [`crate::model::Model`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MfaInfo {
    dom_dim: usize,
    verbose: bool,
    degree: Vec<usize>,
    nctrl_pts: Vec<usize>,
    param_method: ParamMethod,
    knot_method: KnotConstructionMethod,
    weighted: bool,
    axis_weights: Vec<Option<Vec<f64>>>,
    regularization: RegularizationMode,
    reg_lambda: f64,
    adaptive: bool,
    adaptive_eps: f64,
    adaptive_max_rounds: usize,
}

impl MfaInfo {
    /// Creates a configuration for a `dom_dim`-dimensional domain with
    /// degree 3 and 11 control points on every axis, chord-length
    /// parameterization, averaged knots, unweighted (B-spline, not NURBS)
    /// control points, no regularization, and adaptive encoding disabled.
    /// These mirror the original tool's own defaults.
    #[must_use]
    pub fn new(dom_dim: usize, verbose: bool) -> Self {
        Self {
            dom_dim,
            verbose,
            degree: vec![3; dom_dim],
            nctrl_pts: vec![11; dom_dim],
            param_method: ParamMethod::ChordLength,
            knot_method: KnotConstructionMethod::Averaged,
            weighted: false,
            axis_weights: vec![None; dom_dim],
            regularization: RegularizationMode::None,
            reg_lambda: 0.0,
            adaptive: false,
            adaptive_eps: 1e-3,
            adaptive_max_rounds: 10,
        }
    }

    /// Sets the polynomial degree for `axis`.
    pub fn set_degree(&mut self, axis: usize, p: usize) {
        self.degree[axis] = p;
    }

    /// Sets the starting number of control points for `axis`.
    pub fn set_nctrl_pts(&mut self, axis: usize, n: usize) {
        self.nctrl_pts[axis] = n;
    }

    /// Selects the parameterization method.
    pub fn set_param_method(&mut self, method: ParamMethod) {
        self.param_method = method;
    }

    /// Selects the knot placement method.
    pub fn set_knot_method(&mut self, method: KnotConstructionMethod) {
        self.knot_method = method;
    }

    /// Enables or disables NURBS weighting (otherwise a plain B-spline is
    /// fit, i.e. all weights fixed at 1).
    pub fn set_weighted(&mut self, weighted: bool) {
        self.weighted = weighted;
    }

    /// Sets the NURBS weight of every control point on `axis` (length must
    /// equal the control-point count eventually chosen for that axis, which
    /// this builder does not itself enforce). Has no effect unless
    /// [`Self::set_weighted`] is also enabled; a weighted axis with no
    /// weights set here defaults to all-ones at encode time.
    pub fn set_axis_weights(&mut self, axis: usize, weights: Vec<f64>) {
        self.axis_weights[axis] = Some(weights);
    }

    /// Configures the fixed encoder's regularization penalty.
    pub fn set_regularization(&mut self, lambda: f64, mode: RegularizationMode) {
        self.reg_lambda = lambda;
        self.regularization = mode;
    }

    /// Enables adaptive refinement with error tolerance `eps` and an upper
    /// bound of `max_rounds` scan/refine iterations.
    pub fn set_adaptive(&mut self, eps: f64, max_rounds: usize) {
        self.adaptive = true;
        self.adaptive_eps = eps;
        self.adaptive_max_rounds = max_rounds;
    }

    /// Domain dimension this configuration was created for.
    #[must_use]
    pub fn dom_dim(&self) -> usize {
        self.dom_dim
    }

    /// Whether diagnostics should be emitted during encoding.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Degree for each axis.
    #[must_use]
    pub fn degree(&self) -> &[usize] {
        &self.degree
    }

    /// Starting control point count for each axis.
    #[must_use]
    pub fn nctrl_pts(&self) -> &[usize] {
        &self.nctrl_pts
    }

    /// Configured parameterization method.
    #[must_use]
    pub fn param_method(&self) -> ParamMethod {
        self.param_method
    }

    /// Configured knot placement method.
    #[must_use]
    pub fn knot_method(&self) -> KnotConstructionMethod {
        self.knot_method
    }

    /// Whether NURBS weighting is enabled.
    #[must_use]
    pub fn weighted(&self) -> bool {
        self.weighted
    }

    /// Explicit per-control-point weights configured for `axis`, if any.
    #[must_use]
    pub fn axis_weights(&self, axis: usize) -> Option<&[f64]> {
        self.axis_weights[axis].as_deref()
    }

    /// Configured regularization mode.
    #[must_use]
    pub fn regularization(&self) -> RegularizationMode {
        self.regularization
    }

    /// Configured regularization strength.
    #[must_use]
    pub fn reg_lambda(&self) -> f64 {
        self.reg_lambda
    }

    /// Whether adaptive refinement is enabled.
    #[must_use]
    pub fn adaptive(&self) -> bool {
        self.adaptive
    }

    /// Configured adaptive error tolerance.
    #[must_use]
    pub fn adaptive_eps(&self) -> f64 {
        self.adaptive_eps
    }

    /// Configured maximum number of adaptive scan/refine rounds.
    #[must_use]
    pub fn adaptive_max_rounds(&self) -> usize {
        self.adaptive_max_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let info = MfaInfo::new(2, false);
        assert_eq!(info.degree().len(), 2);
        assert_eq!(info.nctrl_pts().len(), 2);
        assert!(!info.adaptive());
        assert!(!info.weighted());
    }

    #[test]
    fn setters_round_trip() {
        let mut info = MfaInfo::new(1, false);
        info.set_degree(0, 5);
        info.set_nctrl_pts(0, 20);
        info.set_adaptive(1e-4, 20);
        assert_eq!(info.degree()[0], 5);
        assert_eq!(info.nctrl_pts()[0], 20);
        assert!(info.adaptive());
        assert_eq!(info.adaptive_max_rounds(), 20);
    }
}
