//! Visual servoing loop.

mod controller;

pub use controller::{
    center_on_object, ConvergenceConfig, ConvergenceState, ConvergenceStatus, FailureKind,
    GainSchedule, DEFAULT_APPROACH_SPEED, DEFAULT_DIVERGENCE_LIMIT_PX, DEFAULT_LOST_FRAME_LIMIT,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TOLERANCE_PX,
};
