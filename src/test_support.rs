//! Scripted hardware doubles for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::robot::{GripperActuator, MotionPrimitive, RobotError, RobotPose};
use crate::vision::{ClassFilter, Detection, DetectionSource};

/// Hardware call observed by a test double.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Move(RobotPose, f64),
    Open,
    Close(u8),
}

/// Ordered log shared between doubles.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }
}

/// Motion primitive that records every command and reaches targets instantly.
#[derive(Debug, Default)]
pub struct RecordingMotion {
    pub pose: Option<RobotPose>,
    pub moves: Vec<(RobotPose, f64)>,
    fail_on: Option<usize>,
    lose_pose_after: Option<usize>,
    drift: Option<(usize, f64)>,
    journal: Option<Journal>,
}

impl RecordingMotion {
    pub fn at(pose: RobotPose) -> Self {
        Self {
            pose: Some(pose),
            ..Self::default()
        }
    }

    /// Fail the n-th move command (1-based).
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Stop reporting a pose once `n` moves have been issued.
    pub fn losing_pose_after(mut self, n: usize) -> Self {
        self.lose_pose_after = Some(n);
        self
    }

    /// Land the n-th move (1-based) `dx` millimetres off target in X.
    pub fn drifting_on(mut self, n: usize, dx: f64) -> Self {
        self.drift = Some((n, dx));
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl MotionPrimitive for RecordingMotion {
    fn get_pose(&mut self) -> Option<RobotPose> {
        match self.lose_pose_after {
            Some(n) if self.moves.len() >= n => None,
            _ => self.pose,
        }
    }

    fn move_to(&mut self, pose: &RobotPose, speed: f64) -> Result<(), RobotError> {
        self.moves.push((*pose, speed));
        if let Some(journal) = &self.journal {
            journal.push(Event::Move(*pose, speed));
        }
        if self.fail_on == Some(self.moves.len()) {
            return Err(RobotError::CommandFailed("scripted failure".to_string()));
        }
        let mut reached = *pose;
        if let Some((n, dx)) = self.drift {
            if n == self.moves.len() {
                reached.x += dx;
            }
        }
        self.pose = Some(reached);
        Ok(())
    }
}

/// Gripper that records commands and optionally fails them.
#[derive(Debug, Default)]
pub struct RecordingGripper {
    pub commands: Vec<Event>,
    failing: bool,
    journal: Option<Journal>,
}

impl RecordingGripper {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    fn record(&mut self, event: Event) -> Result<(), RobotError> {
        if let Some(journal) = &self.journal {
            journal.push(event.clone());
        }
        self.commands.push(event);
        if self.failing {
            Err(RobotError::GripperFailed("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl GripperActuator for RecordingGripper {
    fn open(&mut self) -> Result<(), RobotError> {
        self.record(Event::Open)
    }

    fn close(&mut self, force: u8) -> Result<(), RobotError> {
        self.record(Event::Close(force))
    }
}

/// Detection source playing scripted frames, then repeating a fallback frame.
#[derive(Debug, Default)]
pub struct ScriptedDetections {
    frames: VecDeque<Vec<Detection>>,
    fallback: Vec<Detection>,
    pub polls: usize,
}

impl ScriptedDetections {
    /// Source that never sees anything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Source that reports the same detection on every poll.
    pub fn repeating(detection: Detection) -> Self {
        Self {
            fallback: vec![detection],
            ..Self::default()
        }
    }

    pub fn then(mut self, frame: Vec<Detection>) -> Self {
        self.frames.push_back(frame);
        self
    }
}

impl DetectionSource for ScriptedDetections {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection> {
        self.polls += 1;
        self.frames
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
            .into_iter()
            .filter_map(|mut d| {
                d.class_label = filter.canonical(&d.class_label)?;
                Some(d)
            })
            .collect()
    }
}
