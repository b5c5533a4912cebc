#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! Multivariate functional approximation over a hierarchical T-mesh of
//! tensor-product NURBS: fit scattered or gridded samples of `f: [0, 1]^d ->
//! R^r`, decode at arbitrary parameters, differentiate, and integrate along
//! rays.

pub mod adaptive;
pub mod basis;
pub mod convert;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod info;
pub mod knots;
pub mod model;
pub mod nd_iter;
pub mod params;
pub mod point_set;
pub mod ray_model;
pub mod tmesh;

pub use error::{Error, Result};
pub use info::MfaInfo;
pub use model::{Model, RangeError};
pub use point_set::PointSet;
