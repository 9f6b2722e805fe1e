//! Persistent settings for the CLI.
//! Stored in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::listener::DEFAULT_LISTENER_ADDR;
use crate::robot::{RobotPose, UrConfig, DEFAULT_TRAVEL_SPEED};
use crate::sequence::{PhaseTiming, PlanarTarget, SequencerConfig};
use crate::servo::{ConvergenceConfig, GainSchedule};
use crate::transform::{CalibrationConfig, PlanarOffset, PixelPoint};
use crate::vision::ClassFilter;

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Robot controller address
    pub robot_ip: String,
    /// Object classes to pick
    pub target_objects: Vec<String>,
    /// Millimetres per pixel at working height
    pub mm_per_pixel: f64,
    pub invert_x: bool,
    pub invert_y: bool,
    /// Gripper position relative to the image center, in pixels
    pub gripper_offset_x: f64,
    pub gripper_offset_y: f64,
    pub image_width: u32,
    pub image_height: u32,
    /// Centering tolerance in pixels
    pub tolerance_px: f64,
    pub max_attempts: u32,
    pub lost_frame_limit: u32,
    pub gain_base: f64,
    pub gain_late: f64,
    pub gain_switch_at: u32,
    pub settle_delay_ms: u64,
    /// Abort centering when the error grows by this many pixels (`null` disables)
    pub divergence_limit_px: Option<f64>,
    /// Speeds in mm/s
    pub travel_speed: f64,
    pub approach_speed: f64,
    pub descent_speed: f64,
    /// Heights in mm
    pub safe_height: f64,
    pub approach_height: f64,
    pub pick_height: f64,
    pub place_clearance: f64,
    pub position_tolerance: f64,
    pub timing: PhaseTiming,
    /// Home position [x, y, z] in mm
    pub home: [f64; 3],
    /// Sort picked objects to their configured positions
    pub auto_place: bool,
    /// Table search positions [x, y] in mm
    pub search_grid: Vec<[f64; 2]>,
    /// TrueType font for overlay labels
    pub overlay_font: Option<PathBuf>,
    /// Command listener bind address
    pub listener_addr: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        let calibration = CalibrationConfig::default();
        let convergence = ConvergenceConfig::default();
        let sequencer = SequencerConfig::default();
        Self {
            robot_ip: UrConfig::default().host,
            target_objects: vec![
                "remote".to_string(),
                "scissors".to_string(),
                "mouse".to_string(),
                "cell phone".to_string(),
                "bottle".to_string(),
                "can".to_string(),
                "apple".to_string(),
            ],
            mm_per_pixel: calibration.scale_per_pixel,
            invert_x: calibration.invert_x,
            invert_y: calibration.invert_y,
            gripper_offset_x: calibration.gripper_offset.dx,
            gripper_offset_y: calibration.gripper_offset.dy,
            image_width: (calibration.image_center.x * 2) as u32,
            image_height: (calibration.image_center.y * 2) as u32,
            tolerance_px: convergence.tolerance_px,
            max_attempts: convergence.max_attempts,
            lost_frame_limit: convergence.lost_frame_limit,
            gain_base: convergence.gains.base,
            gain_late: convergence.gains.late,
            gain_switch_at: convergence.gains.switch_at,
            settle_delay_ms: convergence.settle_delay.as_millis() as u64,
            divergence_limit_px: convergence.divergence_limit_px,
            travel_speed: DEFAULT_TRAVEL_SPEED,
            approach_speed: convergence.approach_speed,
            descent_speed: sequencer.descent_speed,
            safe_height: sequencer.safe_height,
            approach_height: sequencer.approach_height,
            pick_height: sequencer.pick_height,
            place_clearance: sequencer.place_clearance,
            position_tolerance: sequencer.position_tolerance,
            timing: PhaseTiming::default(),
            home: [sequencer.home.x, sequencer.home.y, sequencer.home.z],
            auto_place: sequencer.auto_place,
            search_grid: sequencer.search_grid.iter().map(|p| [p.x, p.y]).collect(),
            overlay_font: None,
            listener_addr: DEFAULT_LISTENER_ADDR.to_string(),
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "visual-pick")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| fs::read_to_string(&path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or("Cannot determine config directory")?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("settings.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("ROBOT_IP").filter(|v| !v.trim().is_empty()) {
            self.robot_ip = ip.trim().to_string();
        }
        if let Some(targets) = lookup("TARGET_OBJECTS") {
            let targets: Vec<String> = targets
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if !targets.is_empty() {
                self.target_objects = targets;
            }
        }
        if let Some(value) = lookup("MM_PER_PIXEL") {
            match value.trim().parse::<f64>() {
                Ok(scale) => self.mm_per_pixel = scale,
                Err(_) => tracing::warn!("Ignoring invalid MM_PER_PIXEL={}", value),
            }
        }
        if let Some(value) = lookup("INVERT_X") {
            match parse_bool(&value) {
                Some(flag) => self.invert_x = flag,
                None => tracing::warn!("Ignoring invalid INVERT_X={}", value),
            }
        }
        if let Some(value) = lookup("INVERT_Y") {
            match parse_bool(&value) {
                Some(flag) => self.invert_y = flag,
                None => tracing::warn!("Ignoring invalid INVERT_Y={}", value),
            }
        }
        if let Some(value) = lookup("LISTENER_PORT") {
            match value.trim().parse::<u16>() {
                Ok(port) => {
                    let host = self
                        .listener_addr
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| "127.0.0.1".to_string());
                    self.listener_addr = format!("{}:{}", host, port);
                }
                Err(_) => tracing::warn!("Ignoring invalid LISTENER_PORT={}", value),
            }
        }
    }

    pub fn calibration(&self) -> CalibrationConfig {
        CalibrationConfig {
            scale_per_pixel: self.mm_per_pixel,
            invert_x: self.invert_x,
            invert_y: self.invert_y,
            gripper_offset: PlanarOffset::pixel(self.gripper_offset_x, self.gripper_offset_y),
            image_center: PixelPoint::new(
                (self.image_width / 2) as i32,
                (self.image_height / 2) as i32,
            ),
        }
    }

    pub fn convergence(&self) -> ConvergenceConfig {
        let config = ConvergenceConfig::default()
            .with_tolerance(self.tolerance_px)
            .with_max_attempts(self.max_attempts)
            .with_lost_frame_limit(self.lost_frame_limit)
            .with_gains(GainSchedule {
                base: self.gain_base,
                late: self.gain_late,
                switch_at: self.gain_switch_at,
            })
            .with_approach_speed(self.approach_speed)
            .with_settle_delay(Duration::from_millis(self.settle_delay_ms));
        ConvergenceConfig {
            divergence_limit_px: self.divergence_limit_px,
            ..config
        }
    }

    pub fn sequencer(&self) -> SequencerConfig {
        SequencerConfig {
            safe_height: self.safe_height,
            approach_height: self.approach_height,
            pick_height: self.pick_height,
            place_clearance: self.place_clearance,
            descent_speed: self.descent_speed,
            position_tolerance: self.position_tolerance,
            timing: self.timing.clone(),
            home: RobotPose::new(self.home[0], self.home[1], self.home[2]),
            auto_place: self.auto_place,
            search_grid: self
                .search_grid
                .iter()
                .map(|[x, y]| PlanarTarget::new(*x, *y))
                .collect(),
            convergence: self.convergence(),
        }
    }

    pub fn ur_config(&self) -> UrConfig {
        UrConfig::default().with_host(self.robot_ip.clone())
    }

    pub fn class_filter(&self) -> ClassFilter {
        ClassFilter::new(&self.target_objects)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
