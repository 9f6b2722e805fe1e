//! Closed-loop centering of the gripper over a detected object.
//!
//! Each iteration observes the object, maps its pixel position to a workspace
//! target and moves a damped fraction of the way there. The loop is bounded by
//! two independent counters: `attempt` counts motion steps and `lost_frames`
//! counts consecutive polls without a detection.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::robot::{Arm, MotionPrimitive, RobotError, RobotPose};
use crate::transform::{pixel_distance, transform, CalibrationConfig};
use crate::vision::{ClassFilter, Detection, DetectionSource};

/// Default centering tolerance in pixels.
pub const DEFAULT_TOLERANCE_PX: f64 = 15.0;

/// Default motion step budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default number of consecutive empty polls tolerated.
pub const DEFAULT_LOST_FRAME_LIMIT: u32 = 30;

/// Default growth in pixel distance between observations that aborts centering.
pub const DEFAULT_DIVERGENCE_LIMIT_PX: f64 = 20.0;

/// Default speed for centering steps in mm/s.
pub const DEFAULT_APPROACH_SPEED: f64 = 50.0;

/// Two-tier step gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSchedule {
    pub base: f64,
    pub late: f64,
    /// Step index from which `late` applies.
    pub switch_at: u32,
}

impl Default for GainSchedule {
    fn default() -> Self {
        Self {
            base: 0.65,
            late: 0.60,
            switch_at: 5,
        }
    }
}

impl GainSchedule {
    /// Gain for the step with zero-based index `step`.
    pub fn gain_for(&self, step: u32) -> f64 {
        if step < self.switch_at {
            self.base
        } else {
            self.late
        }
    }
}

/// Convergence loop settings.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    pub tolerance_px: f64,
    pub max_attempts: u32,
    pub lost_frame_limit: u32,
    pub gains: GainSchedule,
    /// Speed of centering steps (mm/s).
    pub approach_speed: f64,
    /// Pause after each step so the next frame shows the new position.
    pub settle_delay: Duration,
    /// Stop when the distance grows by more than this between observations.
    pub divergence_limit_px: Option<f64>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            tolerance_px: DEFAULT_TOLERANCE_PX,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lost_frame_limit: DEFAULT_LOST_FRAME_LIMIT,
            gains: GainSchedule::default(),
            approach_speed: DEFAULT_APPROACH_SPEED,
            settle_delay: Duration::from_millis(100),
            divergence_limit_px: Some(DEFAULT_DIVERGENCE_LIMIT_PX),
        }
    }
}

impl ConvergenceConfig {
    pub fn with_tolerance(mut self, tolerance_px: f64) -> Self {
        self.tolerance_px = tolerance_px;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_lost_frame_limit(mut self, limit: u32) -> Self {
        self.lost_frame_limit = limit;
        self
    }

    pub fn with_gains(mut self, gains: GainSchedule) -> Self {
        self.gains = gains;
        self
    }

    pub fn with_approach_speed(mut self, speed: f64) -> Self {
        self.approach_speed = speed;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_divergence_limit(mut self, limit_px: f64) -> Self {
        self.divergence_limit_px = Some(limit_px);
        self
    }
}

/// Why a centering run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    ConnectionLost,
    MotionFailure,
    InvalidCalibration,
}

/// Outcome of a centering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceStatus {
    Running,
    Converged,
    /// Step budget exhausted. The last detection is still usable.
    TimedOut,
    Lost,
    Failed(FailureKind),
    Diverged,
}

/// Counters and status of a centering run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceState {
    pub attempt: u32,
    pub last_distance: f64,
    pub lost_frames: u32,
    /// Tool pose at which the last detection was taken.
    pub observed_at: Option<RobotPose>,
    pub status: ConvergenceStatus,
}

impl Default for ConvergenceState {
    fn default() -> Self {
        Self {
            attempt: 0,
            last_distance: f64::INFINITY,
            lost_frames: 0,
            observed_at: None,
            status: ConvergenceStatus::Running,
        }
    }
}

impl ConvergenceState {
    /// Whether the run ended with a usable detection.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            ConvergenceStatus::Converged | ConvergenceStatus::TimedOut
        )
    }

    fn finish(
        mut self,
        status: ConvergenceStatus,
        last: Option<Detection>,
    ) -> (ConvergenceState, Option<Detection>) {
        self.status = status;
        (self, last)
    }
}

/// Center the gripper reference point over the first matching object of each frame.
///
/// Returns the final loop state and the last detection seen, which is kept
/// on `TimedOut` so the caller can still attempt the grasp. The detection must
/// be mapped against `observed_at`, not the pose after the final step.
pub fn center_on_object<S, M>(
    source: &mut S,
    arm: &mut Arm<M>,
    cal: &CalibrationConfig,
    targets: &ClassFilter,
    config: &ConvergenceConfig,
) -> (ConvergenceState, Option<Detection>)
where
    S: DetectionSource + ?Sized,
    M: MotionPrimitive,
{
    let mut state = ConvergenceState::default();
    if let Err(e) = cal.validate() {
        tracing::error!("Refusing to center with invalid calibration: {}", e);
        return state.finish(
            ConvergenceStatus::Failed(FailureKind::InvalidCalibration),
            None,
        );
    }

    let mut last: Option<Detection> = None;
    let mut previous_distance: Option<f64> = None;

    while state.attempt < config.max_attempts {
        let Some(detection) = source.poll(targets).into_iter().next() else {
            state.lost_frames += 1;
            if state.lost_frames > config.lost_frame_limit {
                tracing::warn!(
                    "Object lost after {} consecutive empty frames",
                    state.lost_frames
                );
                return state.finish(ConvergenceStatus::Lost, last);
            }
            continue;
        };
        state.lost_frames = 0;

        let distance = pixel_distance(detection.center, cal);
        state.last_distance = distance;
        let center = detection.center;
        let label = detection.class_label.clone();
        last = Some(detection);

        let Some(current) = arm.pose() else {
            tracing::error!("Robot pose unavailable during centering");
            return state.finish(ConvergenceStatus::Failed(FailureKind::ConnectionLost), last);
        };
        state.observed_at = Some(current);

        if distance < config.tolerance_px {
            tracing::info!(
                "Centered on {} after {} steps ({:.1}px)",
                label,
                state.attempt,
                distance
            );
            return state.finish(ConvergenceStatus::Converged, last);
        }

        if let (Some(limit), Some(previous)) = (config.divergence_limit_px, previous_distance) {
            if distance - previous > limit {
                tracing::warn!(
                    "Distance grew from {:.1}px to {:.1}px, check axis inversion",
                    previous,
                    distance
                );
                return state.finish(ConvergenceStatus::Diverged, last);
            }
        }
        previous_distance = Some(distance);

        let target = match transform(center, cal, &current) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!("Transform failed: {}", e);
                return state.finish(
                    ConvergenceStatus::Failed(FailureKind::InvalidCalibration),
                    last,
                );
            }
        };

        let gain = config.gains.gain_for(state.attempt);
        let step = current.step_towards(&target, gain);
        state.attempt += 1;

        tracing::info!(
            "Centering step {}/{}: {} at ({}, {}), {:.1}px off, gain {:.2} -> ({:.1}, {:.1})",
            state.attempt,
            config.max_attempts,
            label,
            center.x,
            center.y,
            distance,
            gain,
            step.x,
            step.y
        );

        let moved: Result<(), RobotError> =
            arm.with_speed(config.approach_speed, |arm| arm.move_to(&step));
        if let Err(e) = moved {
            tracing::error!("Centering step {} failed: {}", state.attempt, e);
            let kind = match e {
                RobotError::ConnectionLost => FailureKind::ConnectionLost,
                _ => FailureKind::MotionFailure,
            };
            return state.finish(ConvergenceStatus::Failed(kind), last);
        }

        if !config.settle_delay.is_zero() {
            thread::sleep(config.settle_delay);
        }
    }

    tracing::warn!(
        "Centering budget of {} steps exhausted ({:.1}px off)",
        config.max_attempts,
        state.last_distance
    );
    state.finish(ConvergenceStatus::TimedOut, last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{RobotPose, SimulatedWorld, DEFAULT_TRAVEL_SPEED};
    use crate::test_support::{RecordingMotion, ScriptedDetections};
    use crate::transform::PixelPoint;

    fn fast() -> ConvergenceConfig {
        ConvergenceConfig::default().with_settle_delay(Duration::ZERO)
    }

    fn mouse_at(x: i32, y: i32) -> Detection {
        Detection::new("mouse", PixelPoint::new(x, y), 0.9)
    }

    fn arm() -> Arm<RecordingMotion> {
        Arm::new(RecordingMotion::at(RobotPose::new(700.0, 400.0, 100.0)))
    }

    #[test]
    fn test_gain_schedule_two_tiers() {
        let gains = GainSchedule::default();
        assert_eq!(gains.gain_for(0), 0.65);
        assert_eq!(gains.gain_for(4), 0.65);
        assert_eq!(gains.gain_for(5), 0.60);
        assert_eq!(gains.gain_for(19), 0.60);
    }

    #[test]
    fn test_converged_without_motion() {
        // Reference point is (640, 440); 8px away.
        let mut source = ScriptedDetections::repeating(mouse_at(648, 440));
        let mut arm = arm();

        let (state, last) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::Converged);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.last_distance, 8.0);
        assert_eq!(state.observed_at, Some(RobotPose::new(700.0, 400.0, 100.0)));
        assert!(arm.motion().moves.is_empty());
        assert_eq!(last.unwrap().center, PixelPoint::new(648, 440));
    }

    #[test]
    fn test_lost_after_limit() {
        let mut source = ScriptedDetections::empty();
        let mut arm = arm();

        let (state, last) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::Lost);
        assert_eq!(source.polls, 31);
        assert_eq!(state.lost_frames, 31);
        assert_eq!(state.attempt, 0);
        assert!(last.is_none());
    }

    #[test]
    fn test_detection_resets_lost_frames() {
        let mut source = ScriptedDetections::repeating(mouse_at(648, 440));
        for _ in 0..25 {
            source = source.then(Vec::new());
        }
        source = source.then(vec![mouse_at(900, 440)]);
        for _ in 0..25 {
            source = source.then(Vec::new());
        }
        let mut arm = arm();

        let (state, _) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::Converged);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.lost_frames, 0);
    }

    #[test]
    fn test_motion_failure_restores_speed() {
        let mut source = ScriptedDetections::repeating(mouse_at(900, 600));
        let mut arm = Arm::new(RecordingMotion::at(RobotPose::new(0.0, 0.0, 100.0)).failing_on(3));
        let before = arm.speed();

        let (state, last) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(
            state.status,
            ConvergenceStatus::Failed(FailureKind::MotionFailure)
        );
        assert_eq!(state.attempt, 3);
        assert_eq!(arm.speed(), before);
        assert_eq!(arm.speed(), DEFAULT_TRAVEL_SPEED);
        assert!(arm.motion().moves.iter().all(|(_, v)| *v == DEFAULT_APPROACH_SPEED));
        assert!(last.is_some());
    }

    #[test]
    fn test_timed_out_keeps_last_detection() {
        let mut source = ScriptedDetections::repeating(mouse_at(900, 600));
        let mut arm = arm();

        let (state, last) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::TimedOut);
        assert_eq!(state.attempt, 20);
        assert_eq!(arm.motion().moves.len(), 20);
        assert!(state.is_usable());
        assert_eq!(last.unwrap().center, PixelPoint::new(900, 600));
        // Observed before the final step, not after it.
        assert_eq!(state.observed_at, Some(arm.motion().moves[18].0));
    }

    #[test]
    fn test_damped_step_and_late_gain() {
        let mut source = ScriptedDetections::repeating(mouse_at(750, 440));
        let mut arm = arm();
        let config = fast().with_max_attempts(6);

        center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &config,
        );

        // 110px right of the reference with inverted X is -38.5mm.
        let moves = &arm.motion().moves;
        assert!((moves[0].0.x - (700.0 - 0.65 * 38.5)).abs() < 1e-9);
        assert_eq!(moves[0].0.y, 400.0);
        assert_eq!(moves[0].0.z, 100.0);

        let before_late = moves[4].0.x;
        assert!((moves[5].0.x - (before_late - 0.60 * 38.5)).abs() < 1e-9);
    }

    #[test]
    fn test_pose_unavailable_fails() {
        let mut source = ScriptedDetections::repeating(mouse_at(900, 600));
        let mut arm = Arm::new(RecordingMotion::at(RobotPose::default()).losing_pose_after(2));

        let (state, _) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(
            state.status,
            ConvergenceStatus::Failed(FailureKind::ConnectionLost)
        );
        assert_eq!(state.attempt, 2);
    }

    #[test]
    fn test_zero_budget() {
        let mut source = ScriptedDetections::repeating(mouse_at(900, 600));
        let mut arm = arm();

        let (state, last) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast().with_max_attempts(0),
        );

        assert_eq!(state.status, ConvergenceStatus::TimedOut);
        assert_eq!(source.polls, 0);
        assert!(last.is_none());
    }

    #[test]
    fn test_invalid_calibration() {
        let mut source = ScriptedDetections::repeating(mouse_at(900, 600));
        let mut arm = arm();

        let (state, _) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default().with_scale(0.0),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(
            state.status,
            ConvergenceStatus::Failed(FailureKind::InvalidCalibration)
        );
        assert_eq!(source.polls, 0);
    }

    #[test]
    fn test_converges_on_simulated_world() {
        let cal = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 100.0), cal.clone())
            .with_object("mouse", 650.0, 430.0);
        let mut arm = Arm::new(world.arm());

        let (state, _) = center_on_object(
            &mut world.camera(),
            &mut arm,
            &cal,
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::Converged);
        assert!(state.attempt <= 5);
        let pose = world.pose();
        assert!((pose.x - 650.0).abs() < 6.0);
        assert!((pose.y - 430.0).abs() < 6.0);
        assert_eq!(pose.z, 100.0);
    }

    #[test]
    fn test_converges_with_scale_error() {
        let camera = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 100.0), camera)
            .with_object("mouse", 640.0, 450.0);
        let mut arm = Arm::new(world.arm());

        let (state, _) = center_on_object(
            &mut world.camera(),
            &mut arm,
            &CalibrationConfig::default().with_scale(0.30),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        assert_eq!(state.status, ConvergenceStatus::Converged);
    }

    #[test]
    fn test_wrong_inversion_diverges() {
        let camera = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 100.0), camera)
            .with_object("mouse", 680.0, 400.0);
        let mut arm = Arm::new(world.arm());

        let (state, _) = center_on_object(
            &mut world.camera(),
            &mut arm,
            &CalibrationConfig::default().with_inversion(false, false),
            &ClassFilter::new(["mouse"]),
            &fast().with_divergence_limit(20.0),
        );

        assert_eq!(state.status, ConvergenceStatus::Diverged);
        assert_eq!(state.attempt, 1);
    }

    #[test]
    fn test_divergence_check_on_by_default() {
        assert_eq!(fast().divergence_limit_px, Some(DEFAULT_DIVERGENCE_LIMIT_PX));

        let mut source = ScriptedDetections::repeating(mouse_at(700, 440))
            .then(vec![mouse_at(700, 440)])
            .then(vec![mouse_at(730, 440)]);
        let mut arm = arm();

        let (state, _) = center_on_object(
            &mut source,
            &mut arm,
            &CalibrationConfig::default(),
            &ClassFilter::new(["mouse"]),
            &fast(),
        );

        // 60px, then 90px: grew by 30px.
        assert_eq!(state.status, ConvergenceStatus::Diverged);
        assert_eq!(state.attempt, 1);
    }
}
