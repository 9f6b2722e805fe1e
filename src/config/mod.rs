//! Static configuration tables.

mod objects;

pub use objects::{
    grip_force, known_classes, place_position, place_position_or_default, DEFAULT_GRIP_FORCE,
    DEFAULT_PLACE_POSITION, DETECTOR_ALIASES, GRIP_FORCES, PLACE_POSITIONS,
};
