//! Wavefront Geometry Kernel
//!
//! Stateless planar math shared by the clustering protocol.
//!
//! # Contents
//!
//! - [`Vec2`] / [`Vec3`]: velocities and positions
//! - [`is_in_sector`]: does a point lie in the cone a wavefront sweeps?
//! - [`propagation_delay`]: how long a wavefront needs to reach a point
//!
//! All angles are radians, distances meters, velocities meters per second.

mod sector;
mod vector;

pub use sector::{distance, is_in_sector, propagation_delay};
pub use vector::{Vec2, Vec3};

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn sector_and_delay_agree_on_reachable_point() {
        let dir = Vec2::new(5.0, 0.0);
        let target = Vec2::new(50.0, 5.0);

        assert!(is_in_sector(Vec2::ZERO, target, dir, 100.0, FRAC_PI_2));
        let delay = propagation_delay(Vec2::ZERO, target, dir).unwrap();
        assert_eq!(delay.as_secs(), 10);
        assert!(distance(Vec2::ZERO, target) > 50.0);
    }
}
