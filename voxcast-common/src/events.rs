//! Event types and event bus for the voxcast engine
//!
//! Provides the shared event definitions and the EventBus used by the engine
//! core and the SSE control surface.
//!
//! # Architecture
//!
//! voxcast uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Command channels** (tokio::mpsc): request → single handler
//! - **Shared state** (Arc<RwLock<T>>): read-heavy access

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ========================================
// Core enums
// ========================================

/// Which logical audio producer currently owns the right to emit sound.
///
/// At most one of `Podcast`/`Call` is active at any instant; transitions are
/// serialized by the focus arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFocus {
    /// Nobody is producing sound
    None,
    /// Background podcast playback owns the output
    Podcast,
    /// Live call session owns the output
    Call,
}

impl std::fmt::Display for AudioFocus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioFocus::None => write!(f, "none"),
            AudioFocus::Podcast => write!(f, "podcast"),
            AudioFocus::Call => write!(f, "call"),
        }
    }
}

/// What happens to podcast playback when a call session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    /// Fade playback out and pause it for the duration of the call
    Pause,
    /// Lower playback volume and keep it running under the call
    Duck,
}

impl std::fmt::Display for InterruptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptMode::Pause => write!(f, "pause"),
            InterruptMode::Duck => write!(f, "duck"),
        }
    }
}

/// Connection status of the live call session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session active
    Disconnected,
    /// Session setup in progress (devices, transport)
    Connecting,
    /// Duplex channel open, audio flowing
    Connected,
    /// Session setup or transport failed; no automatic reconnect
    Failed {
        /// Human-readable failure description
        message: String,
    },
}

impl ConnectionStatus {
    /// True while the session is usable for sending audio/video
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    /// The local user
    User,
    /// The remote generative model
    Model,
}

/// One line of the running call transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: SpeakerRole,
    pub text: String,
}

// ========================================
// Engine events
// ========================================

/// Engine event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Audio focus owner changed
    FocusChanged {
        focus: AudioFocus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Podcast playback resumed after a call ended
    PlaybackResumed {
        mode: InterruptMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Call session connection status changed
    CallStatusChanged {
        status: ConnectionStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A transcript line was appended
    TranscriptAppended {
        entry: TranscriptEntry,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The remote model started or stopped speaking
    SpeakingChanged {
        speaking: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Microphone mute toggled
    MicMuteChanged {
        muted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output level sample for visualization (0.0 to 1.0)
    OutputLevel {
        level: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Synthesis pipeline progress (sent after each chunk attempt)
    SynthesisProgress {
        completed: usize,
        total: usize,
        fraction: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Synthesis pipeline finished with at least one fragment
    SynthesisCompleted {
        succeeded: usize,
        dropped: usize,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Synthesis pipeline finished with zero fragments
    SynthesisFailed {
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Get event type as string for SSE event naming and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::FocusChanged { .. } => "FocusChanged",
            EngineEvent::PlaybackResumed { .. } => "PlaybackResumed",
            EngineEvent::CallStatusChanged { .. } => "CallStatusChanged",
            EngineEvent::TranscriptAppended { .. } => "TranscriptAppended",
            EngineEvent::SpeakingChanged { .. } => "SpeakingChanged",
            EngineEvent::MicMuteChanged { .. } => "MicMuteChanged",
            EngineEvent::OutputLevel { .. } => "OutputLevel",
            EngineEvent::SynthesisProgress { .. } => "SynthesisProgress",
            EngineEvent::SynthesisCompleted { .. } => "SynthesisCompleted",
            EngineEvent::SynthesisFailed { .. } => "SynthesisFailed",
        }
    }
}

// ========================================
// EventBus
// ========================================

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Useful for non-critical events (level meters, progress ticks) where it
    /// is acceptable if no component is currently listening.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ========================================
// Tests
// ========================================
