//! Sector containment and delay projection.
//!
//! Both operations work in the frame aligned with a travel direction
//! `(a, b)`. A displacement `Δ` maps to
//!
//! ```text
//! horizontal = ( a·Δx + b·Δy) / (a² + b²)
//! vertical   = (-b·Δx + a·Δy) / (a² + b²)
//! ```
//!
//! `horizontal` is the time needed to cover `Δ` at velocity `(a, b)`, and the
//! pair keeps the sign structure needed for the half-ray tests.

use std::time::Duration;

use crate::Vec2;

/// Displacement `delta` expressed in the frame of `direction`, scaled by `1 / |direction|²`.
///
/// Returns `None` for a zero direction.
#[inline]
fn to_direction_frame(delta: Vec2, direction: Vec2) -> Option<Vec2> {
    let (a, b) = (direction.x, direction.y);
    let norm = a * a + b * b;
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(Vec2::new(
        (a * delta.x + b * delta.y) / norm,
        (-b * delta.x + a * delta.y) / norm,
    ))
}

/// Test whether `destination` lies inside the circular sector anchored at
/// `source`, opening along `direction` with total angle `theta` (radians) and
/// the given `radius`.
///
/// The sector spans `±theta/2` around `direction`. Points on a boundary ray
/// are decided by the sign of a floating-point cross product, so rays whose
/// sine and cosine are inexact fall on either side. The pinned conventions:
///
/// - a point exactly `radius` away is inside (the reject test is strict);
/// - for `theta = π` points perpendicular to `direction` are outside;
/// - for `theta = 2π` the point directly behind `source` is outside.
///
/// A zero `direction` has no sector and always yields `false`.
///
/// # Examples
///
/// ```
/// use std::f64::consts::FRAC_PI_2;
/// use wavefront_geometry::{is_in_sector, Vec2};
///
/// let dir = Vec2::new(10.0, 0.0);
/// assert!(is_in_sector(Vec2::ZERO, Vec2::new(50.0, 10.0), dir, 100.0, FRAC_PI_2));
/// assert!(!is_in_sector(Vec2::ZERO, Vec2::new(-50.0, 0.0), dir, 100.0, FRAC_PI_2));
/// ```
pub fn is_in_sector(source: Vec2, destination: Vec2, direction: Vec2, radius: f64, theta: f64) -> bool {
    let delta = destination - source;
    let Some(local) = to_direction_frame(delta, direction) else {
        return false;
    };
    let (dx, dy) = (local.x, local.y);

    // End ray at +theta/2, start ray at -theta/2.
    let (ex, ey) = ((theta / 2.0).cos(), (theta / 2.0).sin());
    let (sx, sy) = ((-theta / 2.0).cos(), (-theta / 2.0).sin());

    if delta.length_squared() > radius * radius {
        return false;
    }

    if sx * ey - ex * sy > 0.0 {
        // Convex sector (theta < π): inside both rays.
        if sx * dy - dx * sy < 0.0 {
            return false;
        }
        if ex * dy - dx * ey > 0.0 {
            return false;
        }
        true
    } else {
        // Reflex sector (theta >= π): inside either ray.
        if sx * dy - dx * sy >= 0.0 {
            return true;
        }
        if ex * dy - dx * ey <= 0.0 {
            return true;
        }
        false
    }
}

/// Time for a wavefront moving at `direction` (a velocity) to cover the
/// projection of `destination - source` onto that direction.
///
/// Equals `|direction · Δ| / |direction|²`. Returns `None` for a zero
/// direction or a non-representable delay.
///
/// ```
/// use std::time::Duration;
/// use wavefront_geometry::{propagation_delay, Vec2};
///
/// let delay = propagation_delay(Vec2::ZERO, Vec2::new(100.0, 30.0), Vec2::new(10.0, 0.0));
/// assert_eq!(delay, Some(Duration::from_secs(10)));
/// ```
pub fn propagation_delay(source: Vec2, destination: Vec2, direction: Vec2) -> Option<Duration> {
    let local = to_direction_frame(destination - source, direction)?;
    Duration::try_from_secs_f64(local.x.abs()).ok()
}

/// Planar Euclidean distance.
#[inline]
pub fn distance(a: Vec2, b: Vec2) -> f64 {
    a.distance(b)
}
