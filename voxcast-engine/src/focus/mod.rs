//! Audio focus arbitration

pub mod arbiter;

pub use arbiter::{FocusArbiter, FocusConfig, FocusDebugState, PlaybackController};
