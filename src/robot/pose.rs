//! Manipulator pose in the robot base frame.

use serde::{Deserialize, Serialize};

/// Tool position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RobotPose {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance in the XY plane.
    pub fn planar_distance(&self, other: &RobotPose) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Full 3-D distance.
    pub fn distance(&self, other: &RobotPose) -> f64 {
        let dz = self.z - other.z;
        (self.planar_distance(other).powi(2) + dz * dz).sqrt()
    }

    /// Move a fraction `gain` of the way towards `target` in the XY plane.
    pub fn step_towards(&self, target: &RobotPose, gain: f64) -> RobotPose {
        RobotPose {
            x: self.x + gain * (target.x - self.x),
            y: self.y + gain * (target.y - self.y),
            z: target.z,
        }
    }
}
