//! Arm handle owning the shared actuation speed.
//!
//! The speed used for every motion command lives here and can only be changed
//! through a scoped [`SpeedOverride`]. Dropping the override puts back the value
//! that was active when it was created, so nested overrides unwind to the
//! enclosing value rather than to a global default.

use std::ops::{Deref, DerefMut};

use super::motion::{MotionPrimitive, RobotError};
use super::pose::RobotPose;

/// Default travel speed in mm/s.
pub const DEFAULT_TRAVEL_SPEED: f64 = 100.0;

/// Manipulator with its current speed setting.
pub struct Arm<M> {
    motion: M,
    speed: f64,
}

impl<M: MotionPrimitive> Arm<M> {
    /// Wrap a motion primitive using [`DEFAULT_TRAVEL_SPEED`].
    pub fn new(motion: M) -> Self {
        Self {
            motion,
            speed: DEFAULT_TRAVEL_SPEED,
        }
    }

    /// Wrap a motion primitive with a custom travel speed.
    pub fn with_travel_speed(motion: M, speed: f64) -> Result<Self, RobotError> {
        check_speed(speed)?;
        Ok(Self { motion, speed })
    }

    /// Speed used by the next motion command (mm/s).
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Read the current tool pose.
    pub fn pose(&mut self) -> Option<RobotPose> {
        self.motion.get_pose()
    }

    /// Blocking move at the current speed.
    pub fn move_to(&mut self, pose: &RobotPose) -> Result<(), RobotError> {
        tracing::debug!(
            "move_to x={:.1} y={:.1} z={:.1} v={:.1}",
            pose.x,
            pose.y,
            pose.z,
            self.speed
        );
        self.motion.move_to(pose, self.speed)
    }

    /// Temporarily run at `speed` until the returned guard is dropped.
    pub fn override_speed(&mut self, speed: f64) -> Result<SpeedOverride<'_, M>, RobotError> {
        check_speed(speed)?;
        let previous = std::mem::replace(&mut self.speed, speed);
        Ok(SpeedOverride {
            arm: self,
            previous,
        })
    }

    /// Run `body` at `speed`, restoring the previous speed on every exit path.
    pub fn with_speed<T, E, F>(&mut self, speed: f64, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Arm<M>) -> Result<T, E>,
        E: From<RobotError>,
    {
        let mut guard = self.override_speed(speed)?;
        body(&mut guard)
    }

    /// Access the wrapped primitive.
    pub fn motion(&self) -> &M {
        &self.motion
    }
}

fn check_speed(speed: f64) -> Result<(), RobotError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(RobotError::InvalidSpeed(speed))
    }
}

/// Scoped speed override. Dereferences to the arm it was created from.
pub struct SpeedOverride<'a, M> {
    arm: &'a mut Arm<M>,
    previous: f64,
}

impl<M> SpeedOverride<'_, M> {
    /// Speed that will be restored on drop.
    pub fn previous(&self) -> f64 {
        self.previous
    }
}

impl<M> Deref for SpeedOverride<'_, M> {
    type Target = Arm<M>;

    fn deref(&self) -> &Self::Target {
        self.arm
    }
}

impl<M> DerefMut for SpeedOverride<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.arm
    }
}

impl<M> Drop for SpeedOverride<'_, M> {
    fn drop(&mut self) {
        self.arm.speed = self.previous;
    }
}
