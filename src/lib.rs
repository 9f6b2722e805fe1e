// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Visual Pick
//!
//! Camera-guided pick and place for robot arms.
//!
//! An object detector reports where the target sits in the camera image; the
//! servo loop turns that pixel position into small, damped arm moves until the
//! gripper is centered over the object, and the sequencer then runs the grasp,
//! lift and place phases. Hardware is reached through the [`MotionPrimitive`],
//! [`GripperActuator`] and [`DetectionSource`] traits, with adapters for
//! Universal Robots controllers, recorded detection sessions and an in-process
//! simulator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use visual_pick::robot::{Arm, RobotPose, SimulatedWorld};
//! use visual_pick::{CalibrationConfig, ClassFilter, Sequencer, SequencerConfig};
//!
//! let calibration = CalibrationConfig::default();
//! let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 200.0), calibration.clone())
//!     .with_object("mouse", 660.0, 420.0);
//!
//! let mut sequencer = Sequencer::new(
//!     world.camera(),
//!     Arm::new(world.arm()),
//!     world.gripper(),
//!     calibration,
//!     SequencerConfig::default().with_auto_place(true),
//! );
//!
//! let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);
//! println!("{:?} -> {:?}", report.object, report.state);
//! ```

pub mod config;
pub mod listener;
pub mod robot;
pub mod sequence;
pub mod servo;
pub mod settings;
pub mod transform;
pub mod vision;

#[cfg(test)]
mod test_support;

pub use listener::{CommandListener, ListenerError, PickCommand};
pub use robot::{Arm, GripperActuator, MotionPrimitive, RobotError, RobotPose, SpeedOverride};
pub use sequence::{
    PickReport, PlanarTarget, SequenceError, SequenceState, Sequencer, SequencerConfig,
};
pub use servo::{center_on_object, ConvergenceConfig, ConvergenceState, ConvergenceStatus};
pub use settings::AppSettings;
pub use transform::{transform, CalibrationConfig, PixelPoint, TransformError};
pub use vision::{ClassFilter, Detection, DetectionSource};
