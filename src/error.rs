//! Error and result types shared across this crate.

use thiserror::Error;

/// Catch-all error for this crate.
///
/// Variants follow the origin of the failure rather than the module that
/// raised it, so callers can decide how to react without matching on
/// module-specific types: a `Numeric` failure during adaptive refinement is
/// usually recoverable by the caller (try a coarser tolerance), while a
/// `Shape` or `Invariant` failure indicates a programming error upstream.
#[derive(Debug, Error)]
pub enum Error {
    /// Inputs whose sizes or dimensionalities are inconsistent, e.g. a
    /// parameter vector whose length does not match the model's domain
    /// dimension, or a `PointSet` whose `ndom_pts` product disagrees with
    /// the number of rows in its domain matrix.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A parameter value lies outside `[0, 1]`, or a ray endpoint lies
    /// outside the model's bounding box.
    #[error("parameter out of domain: {0}")]
    Domain(String),

    /// A linear solve failed to converge, produced a singular system, or
    /// otherwise returned a numerically unusable result.
    #[error("numeric failure: {0}")]
    Numeric(String),

    /// The adaptive encoder could not make progress: no span could be split
    /// further, or a round produced no new tensors.
    #[error("refinement could not proceed: {0}")]
    Refinement(String),

    /// A T-mesh or basis-evaluator invariant was violated, such as a span
    /// index outside `[p, n]` or an anchor with no matching tensor.
    #[error("t-mesh invariant violated: {0}")]
    Invariant(String),

    /// An error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
