//! Bivariate Gaussian kernel density estimation.
//!
//! For samples `p₁..pₙ` and bandwidth matrix `H` the estimator is
//!
//! ```text
//! f(x) = Σₖ (2π)⁻¹ · det(H)^(-1/2) · exp(-½ (x - pₖ)ᵀ H⁻¹ (x - pₖ))
//! ```
//!
//! [`GaussianKde::eval`] returns the sum without dividing by `n`; callers
//! that need a density per sample divide themselves.

use std::f64::consts::TAU;

use wavefront_geometry::Vec2;

use crate::error::{DensityError, Result};

/// Determinants at or below `SINGULAR_EPSILON · trace²` are treated as zero.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// A symmetric-capable 2×2 matrix in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matrix2 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Matrix2 {
    /// Identity matrix.
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0 };

    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    /// Diagonal matrix.
    pub const fn diagonal(x: f64, y: f64) -> Self {
        Self::new(x, 0.0, 0.0, y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn trace(&self) -> f64 {
        self.a + self.d
    }

    /// Multiply every entry by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.a * factor, self.b * factor, self.c * factor, self.d * factor)
    }

    /// Inverse, rejecting singular or non-finite matrices.
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        let trace = self.trace();
        if !det.is_finite() || det <= SINGULAR_EPSILON * trace * trace {
            return Err(DensityError::SingularBandwidth { determinant: det });
        }
        Ok(Self::new(self.d / det, -self.b / det, -self.c / det, self.a / det))
    }

    /// Quadratic form `vᵀ M v`.
    #[inline]
    pub fn quadratic_form(&self, v: Vec2) -> f64 {
        v.x * (self.a * v.x + self.b * v.y) + v.y * (self.c * v.x + self.d * v.y)
    }
}

/// Sample covariance with `n - 1` normalization.
///
/// Returns [`DensityError::InsufficientData`] for fewer than two samples.
pub fn covariance(samples: &[Vec2]) -> Result<Matrix2> {
    let n = samples.len();
    if n < 2 {
        return Err(DensityError::InsufficientData { count: n });
    }

    let inv_n = 1.0 / n as f64;
    let mean = samples.iter().fold(Vec2::ZERO, |acc, p| acc + *p) * inv_n;

    let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
    for p in samples {
        let d = *p - mean;
        xx += d.x * d.x;
        xy += d.x * d.y;
        yy += d.y * d.y;
    }

    let denom = (n - 1) as f64;
    Ok(Matrix2::new(xx / denom, xy / denom, xy / denom, yy / denom))
}

/// Scott's rule bandwidth for two dimensions: `Σ · n^(-1/3)`.
///
/// The per-axis factor is `n^(-1/(d+4))` with `d = 2`; the matrix scales with
/// its square.
pub fn scott_bandwidth(covariance: &Matrix2, n: usize) -> Matrix2 {
    let factor = (n as f64).powf(-1.0 / 6.0);
    covariance.scaled(factor * factor)
}

/// Gaussian kernel density estimator over planar samples.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<Vec2>,
    bandwidth: Matrix2,
    inverse: Matrix2,
    norm: f64,
}

impl GaussianKde {
    /// Fit an estimator with a Scott's rule bandwidth.
    pub fn new(samples: Vec<Vec2>) -> Result<Self> {
        let cov = covariance(&samples)?;
        let bandwidth = scott_bandwidth(&cov, samples.len());
        Self::with_bandwidth(samples, bandwidth)
    }

    /// Fit an estimator with an explicit bandwidth matrix.
    pub fn with_bandwidth(samples: Vec<Vec2>, bandwidth: Matrix2) -> Result<Self> {
        if samples.is_empty() {
            return Err(DensityError::InsufficientData { count: 0 });
        }
        let inverse = bandwidth.inverse()?;
        let norm = TAU.recip() * bandwidth.determinant().powf(-0.5);
        if !norm.is_finite() {
            return Err(DensityError::NonFinite);
        }
        Ok(Self {
            samples,
            bandwidth,
            inverse,
            norm,
        })
    }

    /// Bandwidth matrix in use.
    pub fn bandwidth(&self) -> Matrix2 {
        self.bandwidth
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; construction rejects empty sample sets.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Kernel sum at `at`.
    pub fn eval(&self, at: Vec2) -> f64 {
        self.samples
            .iter()
            .map(|p| self.kernel(at - *p))
            .sum()
    }

    #[inline]
    fn kernel(&self, d: Vec2) -> f64 {
        self.norm * (-0.5 * self.inverse.quadratic_form(d)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covariance_of_axis_aligned_cross() {
        let samples = [
            Vec2::new(-1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, -2.0),
            Vec2::new(0.0, 2.0),
        ];
        let cov = covariance(&samples).unwrap();
        assert!((cov.a - 2.0 / 3.0).abs() < 1e-12);
        assert!((cov.d - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(cov.b, 0.0);
        assert_eq!(cov.c, 0.0);
    }

    #[test]
    fn covariance_needs_two_samples() {
        assert_eq!(
            covariance(&[Vec2::ZERO]),
            Err(DensityError::InsufficientData { count: 1 })
        );
    }

    #[test]
    fn scott_factor_is_cube_root() {
        let bw = scott_bandwidth(&Matrix2::IDENTITY, 8);
        assert!((bw.a - 0.5).abs() < 1e-12);
        assert!((bw.d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn inverse_of_diagonal() {
        let inv = Matrix2::diagonal(2.0, 4.0).inverse().unwrap();
        assert_eq!(inv, Matrix2::diagonal(0.5, 0.25));
    }

    #[test]
    fn collinear_samples_are_singular() {
        let samples = vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 5.0)];
        assert!(matches!(
            GaussianKde::new(samples),
            Err(DensityError::SingularBandwidth { .. })
        ));
    }

    #[test]
    fn coincident_samples_are_singular() {
        let samples = vec![Vec2::new(3.0, 3.0); 4];
        assert!(matches!(
            GaussianKde::new(samples),
            Err(DensityError::SingularBandwidth { .. })
        ));
    }

    #[test]
    fn unit_kernel_peak() {
        let kde = GaussianKde::with_bandwidth(vec![Vec2::ZERO], Matrix2::IDENTITY).unwrap();
        assert!((kde.eval(Vec2::ZERO) - TAU.recip()).abs() < 1e-15);
        // One standard deviation out along x.
        let expected = TAU.recip() * (-0.5f64).exp();
        assert!((kde.eval(Vec2::new(1.0, 0.0)) - expected).abs() < 1e-15);
    }

    #[test]
    fn eval_sums_without_averaging() {
        let one = GaussianKde::with_bandwidth(vec![Vec2::ZERO], Matrix2::IDENTITY).unwrap();
        let two = GaussianKde::with_bandwidth(vec![Vec2::ZERO; 2], Matrix2::IDENTITY).unwrap();
        assert!((two.eval(Vec2::ZERO) - 2.0 * one.eval(Vec2::ZERO)).abs() < 1e-15);
    }
}
