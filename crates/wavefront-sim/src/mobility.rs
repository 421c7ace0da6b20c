//! Node movement models.

use serde::{Deserialize, Serialize};
use wavefront_cluster::Timestamp;
use wavefront_geometry::{Vec2, Vec3};

/// How a simulated node moves over time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MobilityModel {
    /// Parked at `position`.
    Static { position: Vec2 },
    /// Constant velocity in units per second, starting at `origin` at time
    /// zero.
    Linear { origin: Vec2, velocity: Vec2 },
}

impl MobilityModel {
    pub fn fixed(x: f64, y: f64) -> Self {
        Self::Static {
            position: Vec2::new(x, y),
        }
    }

    pub fn position_at(&self, now: Timestamp) -> Vec3 {
        match *self {
            Self::Static { position } => position.extend(),
            Self::Linear { origin, velocity } => (origin + velocity * now.as_secs_f64()).extend(),
        }
    }
}
