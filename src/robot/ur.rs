//! Universal Robots adapter speaking URScript over TCP.
//!
//! Commands go to the secondary client port as plain URScript lines. The tool
//! pose is read from the real-time state stream, where the actual TCP pose is
//! six big-endian doubles starting at byte 444 of the 1060-byte packet.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::motion::{MotionPrimitive, RobotError};
use super::pose::RobotPose;

/// URScript secondary client port.
pub const DEFAULT_COMMAND_PORT: u16 = 30002;

/// Real-time state port.
pub const DEFAULT_STATE_PORT: u16 = 30003;

/// Length of one real-time state packet.
pub const STATE_PACKET_LEN: usize = 1060;

/// Byte offset of the actual TCP pose inside the state packet.
pub const TCP_POSE_OFFSET: usize = 444;

/// Minimum decrease of the remaining distance that counts as progress.
const MIN_PROGRESS_MM: f64 = 1.0;

/// Tool orientation (rotation vector, radians) used when none is given.
pub const DEFAULT_ORIENTATION: [f64; 3] = [-2.8246, -1.3081, -0.0257];

/// Connection and motion settings for a UR controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrConfig {
    pub host: String,
    pub command_port: u16,
    pub state_port: u16,
    pub connect_timeout_ms: u64,
    pub state_timeout_ms: u64,
    /// Tool acceleration in mm/s².
    pub acceleration: f64,
    /// Fixed tool orientation as a rotation vector.
    pub orientation: [f64; 3],
    /// Wait before the first position poll after sending a move.
    pub start_delay_ms: u64,
    /// A move fails once the arm has made no progress for this long.
    pub stall_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Distance at which a move counts as reached.
    pub reach_tolerance_mm: f64,
}

impl Default for UrConfig {
    fn default() -> Self {
        Self {
            host: "10.121.46.2".to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            state_port: DEFAULT_STATE_PORT,
            connect_timeout_ms: 5000,
            state_timeout_ms: 1000,
            acceleration: 300.0,
            orientation: DEFAULT_ORIENTATION,
            start_delay_ms: 500,
            stall_timeout_ms: 5000,
            poll_interval_ms: 100,
            reach_tolerance_mm: 5.0,
        }
    }
}

impl UrConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// Motion primitive backed by a UR controller.
pub struct UrRobot {
    config: UrConfig,
}

impl UrRobot {
    pub fn new(config: UrConfig) -> Self {
        Self { config }
    }

    /// Verify that the state stream answers and the command port accepts scripts.
    pub fn connect(&self) -> Result<RobotPose, RobotError> {
        let pose = self.read_pose()?;
        self.send_script("textmsg(\"visual-pick connected\")\n")?;
        tracing::info!(
            "Connected to robot at {} (x={:.1} y={:.1} z={:.1})",
            self.config.host,
            pose.x,
            pose.y,
            pose.z
        );
        Ok(pose)
    }

    /// Read one state packet and extract the tool pose.
    pub fn read_pose(&self) -> Result<RobotPose, RobotError> {
        let mut stream = self.open(self.config.state_port)?;
        stream.set_read_timeout(Some(Duration::from_millis(self.config.state_timeout_ms)))?;

        let mut packet = vec![0u8; STATE_PACKET_LEN];
        stream.read_exact(&mut packet)?;

        let tcp = parse_tcp_pose(&packet).ok_or_else(|| {
            RobotError::CommandFailed("State packet did not contain a TCP pose".to_string())
        })?;
        Ok(RobotPose::new(tcp[0] * 1000.0, tcp[1] * 1000.0, tcp[2] * 1000.0))
    }

    /// Send one URScript snippet to the command port.
    pub fn send_script(&self, script: &str) -> Result<(), RobotError> {
        let mut stream = self.open(self.config.command_port)?;
        stream.write_all(script.as_bytes())?;
        stream.flush()?;

        // The controller echoes status frames; draining a few keeps the socket
        // from being reset before the script is parsed.
        stream.set_read_timeout(Some(Duration::from_millis(500)))?;
        let mut response = [0u8; 1024];
        if let Err(e) = stream.read(&mut response) {
            tracing::debug!("No immediate response from robot: {}", e);
        }
        Ok(())
    }

    fn open(&self, port: u16) -> Result<TcpStream, RobotError> {
        let addr = resolve(&self.config.host, port)?;
        let stream =
            TcpStream::connect_timeout(&addr, Duration::from_millis(self.config.connect_timeout_ms))
                .map_err(|e| {
                    tracing::warn!("Robot connection to {} failed: {}", addr, e);
                    RobotError::ConnectionLost
                })?;
        Ok(stream)
    }
}

impl MotionPrimitive for UrRobot {
    fn get_pose(&mut self) -> Option<RobotPose> {
        match self.read_pose() {
            Ok(pose) => Some(pose),
            Err(e) => {
                tracing::warn!("Failed to get robot pose: {}", e);
                None
            }
        }
    }

    fn move_to(&mut self, pose: &RobotPose, speed: f64) -> Result<(), RobotError> {
        let command = format_movel(pose, &self.config.orientation, self.config.acceleration, speed);
        tracing::debug!("Sending {}", command.trim_end());
        self.send_script(&command)?;

        thread::sleep(Duration::from_millis(self.config.start_delay_ms));

        // Long moves may take any time; only a stalled arm is an error.
        let stall_timeout = Duration::from_millis(self.config.stall_timeout_ms);
        let mut last_progress = Instant::now();
        let mut best = f64::INFINITY;
        loop {
            if let Ok(current) = self.read_pose() {
                let remaining = current.distance(pose);
                if remaining < self.config.reach_tolerance_mm {
                    return Ok(());
                }
                if remaining < best - MIN_PROGRESS_MM {
                    best = remaining;
                    last_progress = Instant::now();
                }
            }
            if last_progress.elapsed() >= stall_timeout {
                tracing::warn!("Robot stopped {:.1}mm short of target", best);
                return Err(RobotError::NotReached {
                    timeout_ms: self.config.stall_timeout_ms,
                    remaining_mm: best,
                });
            }
            thread::sleep(Duration::from_millis(self.config.poll_interval_ms));
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, RobotError> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RobotError::CommandFailed(format!("Cannot resolve {}:{}", host, port)))
}

/// Extract `[x, y, z, rx, ry, rz]` (metres, radians) from a real-time state packet.
pub fn parse_tcp_pose(packet: &[u8]) -> Option<[f64; 6]> {
    if packet.len() < STATE_PACKET_LEN {
        return None;
    }

    let mut pose = [0.0; 6];
    for (i, value) in pose.iter_mut().enumerate() {
        let start = TCP_POSE_OFFSET + i * 8;
        let bytes: [u8; 8] = packet[start..start + 8].try_into().ok()?;
        *value = f64::from_be_bytes(bytes);
    }
    Some(pose)
}

/// Build a linear move command. Pose is in millimetres, speed in mm/s.
pub fn format_movel(pose: &RobotPose, orientation: &[f64; 3], acceleration: f64, speed: f64) -> String {
    format!(
        "movel(p[{:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}], a={:.3}, v={:.3})\n",
        pose.x / 1000.0,
        pose.y / 1000.0,
        pose.z / 1000.0,
        orientation[0],
        orientation[1],
        orientation[2],
        acceleration / 1000.0,
        speed / 1000.0
    )
}
