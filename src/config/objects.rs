//! Per-class tables: placement positions, detector aliases and grip forces.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Placement used for classes without an entry in [`PLACE_POSITIONS`] (mm).
pub const DEFAULT_PLACE_POSITION: (f64, f64) = (0.0, 400.0);

/// Gripper force used for classes without an entry in [`GRIP_FORCES`].
pub const DEFAULT_GRIP_FORCE: u8 = 20;

/// Sorting destination of each object class in the robot base frame (mm).
pub static PLACE_POSITIONS: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("remote", (400.0, -400.0));
    m.insert("scissors", (400.0, 400.0));
    m.insert("mouse", (-400.0, 400.0));
    m.insert("cell phone", (-400.0, -400.0));
    m.insert("bottle", (0.0, 500.0));
    m.insert("can", (0.0, -500.0));
    m.insert("apple", (200.0, 200.0));
    m
});

/// Detector labels searched for objects the detector has no class for.
pub static DETECTOR_ALIASES: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("can", vec!["cup", "bottle"]);
    m
});

/// Closing force per class (0-100).
pub static GRIP_FORCES: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("remote", 15);
    m.insert("mouse", 18);
    m.insert("scissors", 25);
    m
});

/// Get the placement position for a class.
pub fn place_position(class: &str) -> Option<(f64, f64)> {
    PLACE_POSITIONS.get(class).copied()
}

/// Placement position for a class, falling back to [`DEFAULT_PLACE_POSITION`].
pub fn place_position_or_default(class: &str) -> (f64, f64) {
    place_position(class).unwrap_or(DEFAULT_PLACE_POSITION)
}

/// Gripper force for a class.
pub fn grip_force(class: &str) -> u8 {
    GRIP_FORCES.get(class).copied().unwrap_or(DEFAULT_GRIP_FORCE)
}

/// All classes with a configured placement, sorted.
pub fn known_classes() -> Vec<&'static str> {
    let mut classes: Vec<_> = PLACE_POSITIONS.keys().copied().collect();
    classes.sort();
    classes
}
