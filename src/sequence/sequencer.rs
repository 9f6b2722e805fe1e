//! Pick and place state machine.

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{grip_force, place_position_or_default};
use crate::robot::{Arm, GripperActuator, MotionPrimitive, RobotError, RobotPose};
use crate::servo::{
    center_on_object, ConvergenceConfig, ConvergenceState, ConvergenceStatus, FailureKind,
};
use crate::transform::{transform, CalibrationConfig, TransformError};
use crate::vision::{ClassFilter, Detection, DetectionSource};

/// Default safe travel height in mm.
pub const DEFAULT_SAFE_HEIGHT: f64 = 200.0;

/// Default height above the object before the final descent in mm.
pub const DEFAULT_APPROACH_HEIGHT: f64 = 100.0;

/// Default grasp height in mm.
pub const DEFAULT_PICK_HEIGHT: f64 = 0.01;

/// Default descent speed in mm/s.
pub const DEFAULT_DESCENT_SPEED: f64 = 50.0;

/// Table sweep visited at approach height when looking for objects (mm).
pub const DEFAULT_SEARCH_GRID: [(f64, f64); 9] = [
    (300.0, 600.0),
    (500.0, 600.0),
    (700.0, 600.0),
    (300.0, 400.0),
    (500.0, 400.0),
    (700.0, 400.0),
    (300.0, 200.0),
    (500.0, 200.0),
    (700.0, 200.0),
];

/// Phase of a pick run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    Idle,
    Searching,
    Centering,
    Picking,
    Lifting,
    Placing,
    Done,
    Failed,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceState::Idle => "idle",
            SequenceState::Searching => "searching",
            SequenceState::Centering => "centering",
            SequenceState::Picking => "picking",
            SequenceState::Lifting => "lifting",
            SequenceState::Placing => "placing",
            SequenceState::Done => "done",
            SequenceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Pick run errors.
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Lost connection to robot")]
    ConnectionLost,
    #[error("Motion failed while {phase}: {source}")]
    Motion {
        phase: SequenceState,
        #[source]
        source: RobotError,
    },
    #[error("Centering failed: {0:?}")]
    Centering(FailureKind),
    #[error("Object lost during centering")]
    ObjectLost,
    #[error("Centering diverged")]
    Diverged,
    #[error("No detection to pick")]
    NoDetection,
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),
}

/// Planar position in the robot base frame (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarTarget {
    pub x: f64,
    pub y: f64,
}

impl PlanarTarget {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn at(&self, z: f64) -> RobotPose {
        RobotPose::new(self.x, self.y, z)
    }
}

impl From<(f64, f64)> for PlanarTarget {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Pauses between phases, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTiming {
    pub gripper_open_ms: u64,
    pub gripper_close_ms: u64,
    pub release_ms: u64,
    pub between_moves_ms: u64,
    /// Dwell at each search position before looking.
    pub search_dwell_ms: u64,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            gripper_open_ms: 1000,
            gripper_close_ms: 2000,
            release_ms: 1500,
            between_moves_ms: 500,
            search_dwell_ms: 1500,
        }
    }
}

impl PhaseTiming {
    /// No pauses at all.
    pub fn zero() -> Self {
        Self {
            gripper_open_ms: 0,
            gripper_close_ms: 0,
            release_ms: 0,
            between_moves_ms: 0,
            search_dwell_ms: 0,
        }
    }
}

/// Sequencer configuration.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub safe_height: f64,
    pub approach_height: f64,
    pub pick_height: f64,
    /// Release height above `pick_height` when placing.
    pub place_clearance: f64,
    pub descent_speed: f64,
    /// Maximum planar error at approach height before a corrective move.
    pub position_tolerance: f64,
    pub timing: PhaseTiming,
    pub home: RobotPose,
    /// Place at the class's sorting position when no target is given.
    /// Otherwise the object is carried home and released there.
    pub auto_place: bool,
    pub search_grid: Vec<PlanarTarget>,
    pub convergence: ConvergenceConfig,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            safe_height: DEFAULT_SAFE_HEIGHT,
            approach_height: DEFAULT_APPROACH_HEIGHT,
            pick_height: DEFAULT_PICK_HEIGHT,
            place_clearance: 10.0,
            descent_speed: DEFAULT_DESCENT_SPEED,
            position_tolerance: 5.0,
            timing: PhaseTiming::default(),
            home: RobotPose::new(728.9, 573.1, 198.8),
            auto_place: false,
            search_grid: DEFAULT_SEARCH_GRID.iter().copied().map(PlanarTarget::from).collect(),
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl SequencerConfig {
    pub fn with_timing(mut self, timing: PhaseTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_auto_place(mut self, auto_place: bool) -> Self {
        self.auto_place = auto_place;
        self
    }

    pub fn with_convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn with_home(mut self, home: RobotPose) -> Self {
        self.home = home;
        self
    }

    pub fn with_search_grid(mut self, grid: Vec<PlanarTarget>) -> Self {
        self.search_grid = grid;
        self
    }
}

/// Outcome of one pick run.
#[derive(Debug, Serialize)]
pub struct PickReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: SequenceState,
    pub convergence: Option<ConvergenceState>,
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<SequenceError>,
    /// Phase that was active when the run failed.
    pub failed_phase: Option<SequenceState>,
    pub final_pose: Option<RobotPose>,
    pub attempts_used: u32,
    pub object: Option<String>,
    /// Detection the pick target was computed from.
    pub detection: Option<Detection>,
    /// Where the object was released.
    pub placed_at: Option<PlanarTarget>,
}

impl PickReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: SequenceState::Idle,
            convergence: None,
            failure: None,
            failed_phase: None,
            final_pose: None,
            attempts_used: 0,
            object: None,
            detection: None,
            placed_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == SequenceState::Done
    }

    /// Whether the object went out of view and a table search may find it again.
    pub fn needs_search(&self) -> bool {
        matches!(
            self.failure,
            Some(SequenceError::ObjectLost | SequenceError::Diverged)
        )
    }
}

fn serialize_failure<S: Serializer>(
    failure: &Option<SequenceError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Drives centering, grasping, lifting and placing for one object at a time.
pub struct Sequencer<S, M, G> {
    source: S,
    arm: Arm<M>,
    gripper: G,
    calibration: CalibrationConfig,
    config: SequencerConfig,
    state: SequenceState,
}

impl<S, M, G> Sequencer<S, M, G>
where
    S: DetectionSource,
    M: MotionPrimitive,
    G: GripperActuator,
{
    pub fn new(
        source: S,
        arm: Arm<M>,
        gripper: G,
        calibration: CalibrationConfig,
        config: SequencerConfig,
    ) -> Self {
        Self {
            source,
            arm,
            gripper,
            calibration,
            config,
            state: SequenceState::Idle,
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn arm(&self) -> &Arm<M> {
        &self.arm
    }

    /// Center on, grasp and optionally place one object matching `targets`.
    pub fn pick_and_place(
        &mut self,
        targets: &ClassFilter,
        place: Option<PlanarTarget>,
    ) -> PickReport {
        let mut report = PickReport::new();
        let span = tracing::info_span!("pick", run_id = %report.run_id);
        let _enter = span.enter();

        tracing::info!("Starting pick run for {:?}", targets.targets());
        self.state = SequenceState::Idle;

        match self.run(targets, place, &mut report) {
            Ok(()) => {
                self.state = SequenceState::Done;
                tracing::info!(
                    "Pick run finished: {}",
                    report.object.as_deref().unwrap_or("object")
                );
            }
            Err(e) => {
                tracing::error!("Pick run failed while {}: {}", self.state, e);
                report.failed_phase = Some(self.state);
                report.failure = Some(e);
                self.state = SequenceState::Failed;
            }
        }

        report.state = self.state;
        report.final_pose = self.arm.pose();
        report
    }

    /// Move to the configured home pose at travel speed.
    pub fn go_home(&mut self) -> Result<(), SequenceError> {
        tracing::info!("Returning to home position");
        let home = self.config.home;
        self.move_to(&home)
    }

    /// Sweep the search grid at approach height until an object matching
    /// `targets` comes into view.
    ///
    /// Returns the index of the grid position where it was seen, or `None`
    /// after a full sweep. Unreachable positions are skipped.
    pub fn search(&mut self, targets: &ClassFilter) -> Result<Option<usize>, SequenceError> {
        self.enter(SequenceState::Searching);
        let result = self.sweep(targets);
        self.state = match result {
            Ok(_) => SequenceState::Idle,
            Err(_) => SequenceState::Failed,
        };
        result
    }

    fn sweep(&mut self, targets: &ClassFilter) -> Result<Option<usize>, SequenceError> {
        let grid = self.config.search_grid.clone();
        tracing::info!("Searching {} positions on table", grid.len());

        for (index, point) in grid.iter().enumerate() {
            tracing::info!(
                "Search position {}/{}: ({:.0}, {:.0})",
                index + 1,
                grid.len(),
                point.x,
                point.y
            );
            match self.move_to(&point.at(self.config.approach_height)) {
                Ok(()) => {}
                Err(SequenceError::ConnectionLost) => return Err(SequenceError::ConnectionLost),
                Err(e) => {
                    tracing::warn!("Skipping search position {}: {}", index + 1, e);
                    continue;
                }
            }
            self.pause(self.config.timing.search_dwell_ms);

            if let Some(found) = self.source.poll(targets).into_iter().next() {
                tracing::info!("Found {} at search position {}", found.class_label, index + 1);
                return Ok(Some(index));
            }
        }

        tracing::warn!("Search complete, no objects found");
        Ok(None)
    }

    fn run(
        &mut self,
        targets: &ClassFilter,
        place: Option<PlanarTarget>,
        report: &mut PickReport,
    ) -> Result<(), SequenceError> {
        self.enter(SequenceState::Centering);
        let (convergence, detection) = center_on_object(
            &mut self.source,
            &mut self.arm,
            &self.calibration,
            targets,
            &self.config.convergence,
        );
        report.attempts_used = convergence.attempt;
        let status = convergence.status;
        let observed_at = convergence.observed_at;
        report.convergence = Some(convergence);

        match status {
            ConvergenceStatus::Converged => {}
            ConvergenceStatus::TimedOut => {
                tracing::warn!("Centering did not converge, picking at last known position");
            }
            ConvergenceStatus::Lost => return Err(SequenceError::ObjectLost),
            ConvergenceStatus::Diverged => return Err(SequenceError::Diverged),
            ConvergenceStatus::Failed(FailureKind::ConnectionLost) => {
                return Err(SequenceError::ConnectionLost)
            }
            ConvergenceStatus::Failed(kind) => return Err(SequenceError::Centering(kind)),
            ConvergenceStatus::Running => return Err(SequenceError::NoDetection),
        }

        let detection = detection.ok_or(SequenceError::NoDetection)?;
        let label = detection.class_label.clone();
        report.object = Some(label.clone());

        // The arm may have stepped since this detection was taken.
        let observed_at = observed_at.ok_or(SequenceError::ConnectionLost)?;
        let pick = transform(detection.center, &self.calibration, &observed_at)?;
        let pick = PlanarTarget::new(pick.x, pick.y);
        report.detection = Some(detection);

        self.enter(SequenceState::Picking);
        self.grip(GripAction::Open);
        self.pause(self.config.timing.gripper_open_ms);

        self.move_to(&pick.at(self.config.safe_height))?;
        self.pause(self.config.timing.between_moves_ms);
        self.move_to(&pick.at(self.config.approach_height))?;
        self.verify_position(&pick.at(self.config.approach_height))?;
        self.pause(self.config.timing.between_moves_ms);

        self.descend(&pick.at(self.config.pick_height))?;
        self.pause(self.config.timing.between_moves_ms);
        self.grip(GripAction::Close(grip_force(&label)));
        self.pause(self.config.timing.gripper_close_ms);

        self.enter(SequenceState::Lifting);
        self.move_to(&pick.at(self.config.approach_height))?;
        self.move_to(&pick.at(self.config.safe_height))?;

        let destination = place.or_else(|| {
            self.config
                .auto_place
                .then(|| PlanarTarget::from(place_position_or_default(&label)))
        });
        let Some(destination) = destination else {
            return self.release_at_home(&label, report);
        };

        self.enter(SequenceState::Placing);
        tracing::info!(
            "Placing {} at ({:.1}, {:.1})",
            label,
            destination.x,
            destination.y
        );
        self.move_to(&destination.at(self.config.safe_height))?;
        self.pause(self.config.timing.between_moves_ms);
        self.move_to(&destination.at(self.config.approach_height))?;
        self.descend(&destination.at(self.config.pick_height + self.config.place_clearance))?;
        self.pause(self.config.timing.between_moves_ms);
        self.grip(GripAction::Open);
        self.pause(self.config.timing.release_ms);
        self.move_to(&destination.at(self.config.safe_height))?;
        report.placed_at = Some(destination);

        Ok(())
    }

    fn release_at_home(&mut self, label: &str, report: &mut PickReport) -> Result<(), SequenceError> {
        self.enter(SequenceState::Placing);
        tracing::info!("No place target, releasing {} at home", label);
        self.go_home()?;
        self.grip(GripAction::Open);
        self.pause(self.config.timing.release_ms);
        report.placed_at = Some(PlanarTarget::new(self.config.home.x, self.config.home.y));
        Ok(())
    }

    fn enter(&mut self, state: SequenceState) {
        tracing::info!("Phase: {}", state);
        self.state = state;
    }

    fn move_to(&mut self, pose: &RobotPose) -> Result<(), SequenceError> {
        let phase = self.state;
        self.arm.move_to(pose).map_err(|e| motion_error(phase, e))
    }

    fn descend(&mut self, pose: &RobotPose) -> Result<(), SequenceError> {
        let phase = self.state;
        self.arm
            .with_speed(self.config.descent_speed, |arm| arm.move_to(pose))
            .map_err(|e| motion_error(phase, e))
    }

    /// Re-issue the move once if the arm stopped too far from `target`.
    fn verify_position(&mut self, target: &RobotPose) -> Result<(), SequenceError> {
        let current = self.arm.pose().ok_or(SequenceError::ConnectionLost)?;
        let error = current.planar_distance(target);
        if error > self.config.position_tolerance {
            tracing::warn!("Position error {:.1}mm, adjusting", error);
            self.move_to(target)?;
        } else {
            tracing::debug!("Position accurate (error {:.1}mm)", error);
        }
        Ok(())
    }

    fn grip(&mut self, action: GripAction) {
        let result = match action {
            GripAction::Open => self.gripper.open(),
            GripAction::Close(force) => self.gripper.close(force),
        };
        if let Err(e) = result {
            tracing::warn!("Gripper {:?} failed: {}", action, e);
        }
    }

    fn pause(&self, ms: u64) {
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GripAction {
    Open,
    Close(u8),
}

fn motion_error(phase: SequenceState, error: RobotError) -> SequenceError {
    match error {
        RobotError::ConnectionLost => SequenceError::ConnectionLost,
        source => SequenceError::Motion { phase, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{SimulatedWorld, DEFAULT_TRAVEL_SPEED};
    use crate::test_support::{Event, Journal, RecordingGripper, RecordingMotion, ScriptedDetections};
    use crate::transform::PixelPoint;
    use crate::vision::Detection;
    use std::time::Duration;

    fn config() -> SequencerConfig {
        SequencerConfig::default()
            .with_timing(PhaseTiming::zero())
            .with_convergence(ConvergenceConfig::default().with_settle_delay(Duration::ZERO))
    }

    fn centered_mouse() -> ScriptedDetections {
        ScriptedDetections::repeating(Detection::new("mouse", PixelPoint::new(648, 440), 0.9))
    }

    fn sequencer(
        source: ScriptedDetections,
        motion: RecordingMotion,
        gripper: RecordingGripper,
    ) -> Sequencer<ScriptedDetections, RecordingMotion, RecordingGripper> {
        Sequencer::new(
            source,
            Arm::new(motion),
            gripper,
            CalibrationConfig::default(),
            config(),
        )
    }

    fn start() -> RobotPose {
        RobotPose::new(700.0, 400.0, 200.0)
    }

    #[test]
    fn test_phase_order() {
        let journal = Journal::default();
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()).with_journal(journal.clone()),
            RecordingGripper::default().with_journal(journal.clone()),
        );

        let report = sequencer.pick_and_place(
            &ClassFilter::new(["mouse"]),
            Some(PlanarTarget::new(300.0, -200.0)),
        );

        assert!(report.is_success());
        assert_eq!(report.object.as_deref(), Some("mouse"));
        assert_eq!(report.attempts_used, 0);
        assert_eq!(report.placed_at, Some(PlanarTarget::new(300.0, -200.0)));

        // (z, speed) of every move; gripper commands as (-1, force).
        let trace: Vec<(f64, f64)> = journal
            .events()
            .iter()
            .map(|e| match e {
                Event::Move(pose, speed) => (pose.z, *speed),
                Event::Open => (-1.0, 0.0),
                Event::Close(force) => (-1.0, *force as f64),
            })
            .collect();
        let expected = [
            (-1.0, 0.0),
            (200.0, DEFAULT_TRAVEL_SPEED),
            (100.0, DEFAULT_TRAVEL_SPEED),
            (0.01, DEFAULT_DESCENT_SPEED),
            (-1.0, 18.0),
            (100.0, DEFAULT_TRAVEL_SPEED),
            (200.0, DEFAULT_TRAVEL_SPEED),
            (200.0, DEFAULT_TRAVEL_SPEED),
            (100.0, DEFAULT_TRAVEL_SPEED),
            (10.01, DEFAULT_DESCENT_SPEED),
            (-1.0, 0.0),
            (200.0, DEFAULT_TRAVEL_SPEED),
        ];
        assert_eq!(trace.len(), expected.len());
        for (got, want) in trace.iter().zip(expected.iter()) {
            assert!((got.0 - want.0).abs() < 1e-9, "{:?} != {:?}", got, want);
            assert_eq!(got.1, want.1);
        }

        // Pick happens 8px left of the reference point: 2.8mm towards +X.
        let Event::Move(pick, _) = journal.events()[3].clone() else {
            panic!("expected descent");
        };
        assert!((pick.x - 697.2).abs() < 1e-9);
        assert_eq!(pick.y, 400.0);
    }

    #[test]
    fn test_released_at_home_without_target() {
        let journal = Journal::default();
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()).with_journal(journal.clone()),
            RecordingGripper::default().with_journal(journal.clone()),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        let home = SequencerConfig::default().home;
        assert_eq!(report.state, SequenceState::Done);
        assert_eq!(report.placed_at, Some(PlanarTarget::new(home.x, home.y)));
        assert_eq!(sequencer.arm().motion().moves.len(), 6);
        assert_eq!(report.final_pose, Some(home));

        let events = journal.events();
        assert_eq!(events[events.len() - 2], Event::Move(home, DEFAULT_TRAVEL_SPEED));
        assert_eq!(events.last(), Some(&Event::Open));
    }

    #[test]
    fn test_auto_place_uses_class_position() {
        let mut sequencer = Sequencer::new(
            centered_mouse(),
            Arm::new(RecordingMotion::at(start())),
            RecordingGripper::default(),
            CalibrationConfig::default(),
            config().with_auto_place(true),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert_eq!(report.placed_at, Some(PlanarTarget::new(-400.0, 400.0)));
        let last = sequencer.arm().motion().moves.last().unwrap().0;
        assert_eq!(last, RobotPose::new(-400.0, 400.0, 200.0));
    }

    #[test]
    fn test_descent_failure_restores_speed() {
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()).failing_on(3),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert_eq!(report.state, SequenceState::Failed);
        assert_eq!(report.failed_phase, Some(SequenceState::Picking));
        assert!(matches!(
            report.failure,
            Some(SequenceError::Motion {
                phase: SequenceState::Picking,
                ..
            })
        ));
        assert_eq!(sequencer.arm().speed(), DEFAULT_TRAVEL_SPEED);
        assert_eq!(sequencer.state(), SequenceState::Failed);
    }

    #[test]
    fn test_place_descent_failure_restores_speed() {
        // Moves: pick safe, approach, descent, approach, safe, place safe,
        // place approach, place descent.
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()).failing_on(8),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(
            &ClassFilter::new(["mouse"]),
            Some(PlanarTarget::new(300.0, -200.0)),
        );

        assert_eq!(report.state, SequenceState::Failed);
        assert_eq!(report.failed_phase, Some(SequenceState::Placing));
        assert_eq!(report.placed_at, None);
        let moves = &sequencer.arm().motion().moves;
        assert_eq!(moves.len(), 8);
        assert_eq!(moves[7].1, DEFAULT_DESCENT_SPEED);
        assert_eq!(sequencer.arm().speed(), DEFAULT_TRAVEL_SPEED);
    }

    #[test]
    fn test_lost_object_fails_without_motion() {
        let mut sequencer = sequencer(
            ScriptedDetections::empty(),
            RecordingMotion::at(start()),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert_eq!(report.state, SequenceState::Failed);
        assert_eq!(report.failed_phase, Some(SequenceState::Centering));
        assert!(matches!(report.failure, Some(SequenceError::ObjectLost)));
        assert!(report.needs_search());
        assert!(sequencer.arm().motion().moves.is_empty());
    }

    #[test]
    fn test_centering_connection_loss() {
        let far = Detection::new("mouse", PixelPoint::new(900, 600), 0.9);
        let mut sequencer = sequencer(
            ScriptedDetections::repeating(far),
            RecordingMotion::at(start()).losing_pose_after(1),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert!(matches!(report.failure, Some(SequenceError::ConnectionLost)));
        assert_eq!(report.attempts_used, 1);
        assert!(report.final_pose.is_none());
    }

    #[test]
    fn test_gripper_failure_is_not_fatal() {
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()),
            RecordingGripper::failing(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert!(report.is_success());
    }

    #[test]
    fn test_approach_corrected_once() {
        let mut sequencer = sequencer(
            centered_mouse(),
            RecordingMotion::at(start()).drifting_on(2, 12.0),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert!(report.is_success());
        let moves = &sequencer.arm().motion().moves;
        assert_eq!(moves.len(), 7);
        assert_eq!(moves[1].0, moves[2].0);
        assert_eq!(moves[2].0.z, 100.0);
    }

    #[test]
    fn test_go_home() {
        let mut sequencer = sequencer(
            ScriptedDetections::empty(),
            RecordingMotion::at(start()),
            RecordingGripper::default(),
        );

        sequencer.go_home().unwrap();

        let moves = &sequencer.arm().motion().moves;
        assert_eq!(moves[0].0, SequencerConfig::default().home);
    }

    #[test]
    fn test_end_to_end_on_simulated_world() {
        let cal = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 200.0), cal.clone())
            .with_object("cup", 650.0, 430.0);
        let mut sequencer = Sequencer::new(
            world.camera(),
            Arm::new(world.arm()),
            world.gripper(),
            cal,
            config().with_auto_place(true),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["can"]), None);

        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.object.as_deref(), Some("can"));
        let object = world.object().unwrap();
        assert!(!object.held);
        assert_eq!((object.x, object.y), (0.0, -500.0));
        assert_eq!(world.pose(), RobotPose::new(0.0, -500.0, 200.0));
    }

    #[test]
    fn test_timed_out_picks_where_object_was_seen() {
        let cal = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(700.0, 400.0, 200.0), cal.clone())
            .with_object("mouse", 650.0, 430.0);
        let convergence = ConvergenceConfig::default()
            .with_settle_delay(Duration::ZERO)
            .with_max_attempts(1);
        let mut sequencer = Sequencer::new(
            world.camera(),
            Arm::new(world.arm()),
            world.gripper(),
            cal,
            config().with_convergence(convergence).with_auto_place(true),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);

        assert_eq!(
            report.convergence.as_ref().map(|c| c.status),
            Some(ConvergenceStatus::TimedOut)
        );
        assert!(report.is_success(), "{:?}", report.failure);
        let object = world.object().unwrap();
        assert_eq!((object.x, object.y), (-400.0, 400.0));
    }

    #[test]
    fn test_search_stops_at_first_sighting() {
        let cal = CalibrationConfig::default();
        let world = SimulatedWorld::new(RobotPose::new(0.0, 0.0, 200.0), cal.clone())
            .with_object("bottle", 700.0, 200.0);
        let mut sequencer = Sequencer::new(
            world.camera(),
            Arm::new(world.arm()),
            world.gripper(),
            cal,
            config(),
        );
        let targets = ClassFilter::new(["bottle"]);

        // 200mm to the side is already in view from (500, 200).
        assert_eq!(sequencer.search(&targets).unwrap(), Some(7));
        assert_eq!(sequencer.state(), SequenceState::Idle);
        assert_eq!(world.move_count(), 8);
        assert_eq!(world.pose(), RobotPose::new(500.0, 200.0, DEFAULT_APPROACH_HEIGHT));

        let report = sequencer.pick_and_place(&targets, None);
        assert!(report.is_success(), "{:?}", report.failure);
        let home = SequencerConfig::default().home;
        let object = world.object().unwrap();
        assert!(!object.held);
        assert_eq!((object.x, object.y), (home.x, home.y));
    }

    #[test]
    fn test_search_skips_unreachable_position() {
        let world = SimulatedWorld::new(RobotPose::new(0.0, 0.0, 200.0), CalibrationConfig::default())
            .with_failing_move(2);
        let mut sequencer = Sequencer::new(
            world.camera(),
            Arm::new(world.arm()),
            world.gripper(),
            CalibrationConfig::default(),
            config(),
        );

        assert_eq!(sequencer.search(&ClassFilter::new(["bottle"])).unwrap(), None);
        assert_eq!(world.move_count(), 9);
        assert_eq!(world.pose(), RobotPose::new(700.0, 200.0, DEFAULT_APPROACH_HEIGHT));
    }

    #[test]
    fn test_search_stops_on_connection_loss() {
        let world = SimulatedWorld::new(RobotPose::default(), CalibrationConfig::default());
        world.set_online(false);
        let mut sequencer = Sequencer::new(
            world.camera(),
            Arm::new(world.arm()),
            world.gripper(),
            CalibrationConfig::default(),
            config(),
        );

        let result = sequencer.search(&ClassFilter::new(["bottle"]));

        assert!(matches!(result, Err(SequenceError::ConnectionLost)));
        assert_eq!(sequencer.state(), SequenceState::Failed);
    }

    #[test]
    fn test_report_serializes_failure_as_text() {
        let mut sequencer = sequencer(
            ScriptedDetections::empty(),
            RecordingMotion::at(start()),
            RecordingGripper::default(),
        );

        let report = sequencer.pick_and_place(&ClassFilter::new(["mouse"]), None);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["state"], "Failed");
        assert_eq!(json["failure"], "Object lost during centering");
        assert_eq!(json["convergence"]["status"], "Lost");
        assert_eq!(json["run_id"], report.run_id.to_string());
    }
}
