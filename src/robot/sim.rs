//! In-process simulated workspace for dry runs.
//!
//! A single object lies on the table at a fixed position. The simulated camera
//! projects it into pixels relative to the current arm pose using its own
//! calibration, which may deliberately differ from the one the controller uses.

use std::sync::{Arc, Mutex, MutexGuard};

use super::motion::{GripperActuator, MotionPrimitive, RobotError};
use super::pose::RobotPose;
use crate::transform::{reference_point, CalibrationConfig, PixelPoint};
use crate::vision::{ClassFilter, Detection, DetectionSource};

/// Planar distance within which a closing gripper catches the object.
const GRASP_RADIUS_MM: f64 = 15.0;

/// Maximum tool height at which a closing gripper can reach the table.
const GRASP_HEIGHT_MM: f64 = 20.0;

#[derive(Debug)]
struct WorldState {
    pose: RobotPose,
    object: Option<SimObject>,
    camera: CalibrationConfig,
    frame_size: (u32, u32),
    moves: usize,
    fail_move: Option<usize>,
    online: bool,
}

/// Object lying on the simulated table.
#[derive(Debug, Clone)]
pub struct SimObject {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub held: bool,
}

/// Shared state behind the simulated arm, camera and gripper.
#[derive(Debug, Clone)]
pub struct SimulatedWorld {
    state: Arc<Mutex<WorldState>>,
}

impl SimulatedWorld {
    /// Create a world with the arm at `start` and a camera using `camera`.
    pub fn new(start: RobotPose, camera: CalibrationConfig) -> Self {
        let frame_size = (
            (camera.image_center.x.max(0) as u32) * 2,
            (camera.image_center.y.max(0) as u32) * 2,
        );
        Self {
            state: Arc::new(Mutex::new(WorldState {
                pose: start,
                object: None,
                camera,
                frame_size,
                moves: 0,
                fail_move: None,
                online: true,
            })),
        }
    }

    /// Place an object on the table at workspace coordinates (mm).
    pub fn with_object(self, label: impl Into<String>, x: f64, y: f64) -> Self {
        self.lock().object = Some(SimObject {
            label: label.into(),
            x,
            y,
            held: false,
        });
        self
    }

    /// Make the n-th move command (1-based) fail.
    pub fn with_failing_move(self, n: usize) -> Self {
        self.lock().fail_move = Some(n);
        self
    }

    /// Simulate a dropped robot connection.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    pub fn pose(&self) -> RobotPose {
        self.lock().pose
    }

    pub fn object(&self) -> Option<SimObject> {
        self.lock().object.clone()
    }

    /// Number of move commands received so far.
    pub fn move_count(&self) -> usize {
        self.lock().moves
    }

    pub fn arm(&self) -> SimulatedArm {
        SimulatedArm {
            world: self.clone(),
        }
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            world: self.clone(),
        }
    }

    pub fn gripper(&self) -> SimulatedGripper {
        SimulatedGripper {
            world: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorldState {
    /// Pixel at which the camera currently sees the object, if in view.
    fn project(&self, object: &SimObject) -> Option<PixelPoint> {
        if object.held {
            return None;
        }
        let cal = &self.camera;
        let (ref_x, ref_y) = reference_point(cal);

        let mut px = (object.x - self.pose.x) / cal.scale_per_pixel;
        let mut py = (object.y - self.pose.y) / cal.scale_per_pixel;
        if cal.invert_x {
            px = -px;
        }
        if cal.invert_y {
            py = -py;
        }

        let x = (ref_x + px).round();
        let y = (ref_y + py).round();
        let (width, height) = self.frame_size;
        if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
            return None;
        }
        Some(PixelPoint::new(x as i32, y as i32))
    }
}

/// Arm that reaches every commanded pose instantly.
#[derive(Debug, Clone)]
pub struct SimulatedArm {
    world: SimulatedWorld,
}

impl MotionPrimitive for SimulatedArm {
    fn get_pose(&mut self) -> Option<RobotPose> {
        let state = self.world.lock();
        state.online.then_some(state.pose)
    }

    fn move_to(&mut self, pose: &RobotPose, _speed: f64) -> Result<(), RobotError> {
        let mut state = self.world.lock();
        if !state.online {
            return Err(RobotError::ConnectionLost);
        }
        state.moves += 1;
        if state.fail_move == Some(state.moves) {
            return Err(RobotError::CommandFailed(format!(
                "simulated failure on move {}",
                state.moves
            )));
        }

        state.pose = *pose;
        if let Some(object) = state.object.as_mut().filter(|o| o.held) {
            object.x = pose.x;
            object.y = pose.y;
        }
        Ok(())
    }
}

/// Camera plus detector producing one detection for the visible object.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    world: SimulatedWorld,
}

impl DetectionSource for SimulatedCamera {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection> {
        let state = self.world.lock();
        let Some(object) = state.object.as_ref() else {
            return Vec::new();
        };
        let Some(label) = filter.canonical(&object.label) else {
            return Vec::new();
        };

        state
            .project(object)
            .map(|center| vec![Detection::new(label, center, 0.9)])
            .unwrap_or_default()
    }
}

/// Gripper that picks the object up when closed right above it.
#[derive(Debug, Clone)]
pub struct SimulatedGripper {
    world: SimulatedWorld,
}

impl GripperActuator for SimulatedGripper {
    fn open(&mut self) -> Result<(), RobotError> {
        let mut state = self.world.lock();
        if let Some(object) = state.object.as_mut() {
            object.held = false;
        }
        Ok(())
    }

    fn close(&mut self, _force: u8) -> Result<(), RobotError> {
        let mut state = self.world.lock();
        let pose = state.pose;
        if let Some(object) = state.object.as_mut() {
            let distance = (object.x - pose.x).hypot(object.y - pose.y);
            if distance < GRASP_RADIUS_MM && pose.z < GRASP_HEIGHT_MM {
                object.held = true;
            }
        }
        Ok(())
    }
}
