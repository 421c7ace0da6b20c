//! Wavefront Density Estimator
//!
//! Summarizes where a cluster's members are, relative to their cluster head,
//! as a fixed grid of kernel density values. Neighbouring clusters exchange
//! these grids to find forwarding candidates without exchanging member lists.
//!
//! # Estimation
//!
//! - Two or more members: bivariate Gaussian KDE with Scott's rule bandwidth
//! - Fewer: a Dirac-like grid with 1.0 at the origin cell
//! - Collinear or coincident members: [`DensityError::SingularBandwidth`],
//!   recoverable through [`DistributionMap::build_or_fallback`]

mod error;
mod kde;
mod map;

pub use error::{DensityError, Result};
pub use kde::{covariance, scott_bandwidth, GaussianKde, Matrix2, SINGULAR_EPSILON};
pub use map::{DistributionMap, GridSpec, DENSITY_THRESHOLD};
