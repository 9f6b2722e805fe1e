//! Hardware seams consumed by the controller.

use thiserror::Error;

use super::pose::RobotPose;

/// Robot and gripper errors.
#[derive(Error, Debug)]
pub enum RobotError {
    #[error("Lost connection to robot")]
    ConnectionLost,
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error("Target not reached, no progress for {timeout_ms}ms (remaining error {remaining_mm:.1}mm)")]
    NotReached { timeout_ms: u64, remaining_mm: f64 },
    #[error("Invalid speed: {0}")]
    InvalidSpeed(f64),
    #[error("Gripper not available")]
    GripperUnavailable,
    #[error("Gripper command failed: {0}")]
    GripperFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking "move to pose" primitive of the manipulator.
pub trait MotionPrimitive {
    /// Current tool pose, or `None` when the robot cannot be reached.
    fn get_pose(&mut self) -> Option<RobotPose>;

    /// Move linearly to `pose` at `speed` (mm/s), returning once the move has
    /// completed or failed.
    fn move_to(&mut self, pose: &RobotPose, speed: f64) -> Result<(), RobotError>;
}

/// Two-finger gripper.
pub trait GripperActuator {
    fn open(&mut self) -> Result<(), RobotError>;

    /// Close with the given force (0-100).
    fn close(&mut self, force: u8) -> Result<(), RobotError>;
}

/// Stand-in used when no gripper is connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGripper;

impl GripperActuator for DisabledGripper {
    fn open(&mut self) -> Result<(), RobotError> {
        Err(RobotError::GripperUnavailable)
    }

    fn close(&mut self, _force: u8) -> Result<(), RobotError> {
        Err(RobotError::GripperUnavailable)
    }
}

impl<T: MotionPrimitive + ?Sized> MotionPrimitive for Box<T> {
    fn get_pose(&mut self) -> Option<RobotPose> {
        (**self).get_pose()
    }

    fn move_to(&mut self, pose: &RobotPose, speed: f64) -> Result<(), RobotError> {
        (**self).move_to(pose, speed)
    }
}

impl<T: GripperActuator + ?Sized> GripperActuator for Box<T> {
    fn open(&mut self) -> Result<(), RobotError> {
        (**self).open()
    }

    fn close(&mut self, force: u8) -> Result<(), RobotError> {
        (**self).close(force)
    }
}
