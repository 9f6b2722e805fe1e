//! Pick and place sequencing.

mod sequencer;

pub use sequencer::{
    PhaseTiming, PickReport, PlanarTarget, SequenceError, SequenceState, Sequencer,
    SequencerConfig, DEFAULT_APPROACH_HEIGHT, DEFAULT_DESCENT_SPEED, DEFAULT_PICK_HEIGHT,
    DEFAULT_SAFE_HEIGHT, DEFAULT_SEARCH_GRID,
};
