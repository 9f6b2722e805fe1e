//! Manipulator abstraction: poses, the speed-owning arm handle and adapters.

mod arm;
mod motion;
mod pose;
pub mod sim;
pub mod ur;

pub use arm::{Arm, SpeedOverride, DEFAULT_TRAVEL_SPEED};
pub use motion::{DisabledGripper, GripperActuator, MotionPrimitive, RobotError};
pub use pose::RobotPose;
pub use sim::{SimulatedArm, SimulatedCamera, SimulatedGripper, SimulatedWorld};
pub use ur::{UrConfig, UrRobot};
