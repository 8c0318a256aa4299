//! # Voxcast Common Library
//!
//! Shared code for the voxcast engine and its control surfaces:
//! - Event types (EngineEvent enum) and the EventBus
//! - Telemetry recorder (bounded diagnostic ring buffer)

pub mod events;
pub mod telemetry;

pub use events::{
    AudioFocus, ConnectionStatus, EngineEvent, EventBus, InterruptMode, SpeakerRole,
    TranscriptEntry,
};
pub use telemetry::{TelemetryEvent, TelemetryLevel, TelemetryRecorder};
