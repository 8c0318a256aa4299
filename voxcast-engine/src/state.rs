//! Shared engine state
//!
//! Thread-safe observable state for the UI layer: connection status, running
//! transcript, voice activity and the output level meter. Uses RwLock for
//! concurrent read access with rare writes; everything user-visible also goes
//! out as an [`EngineEvent`] on the bus.

use tokio::sync::RwLock;
use uuid::Uuid;

use voxcast_common::events::{
    ConnectionStatus, EngineEvent, EventBus, SpeakerRole, TranscriptEntry,
};

/// Shared state accessible by all components
pub struct SharedState {
    /// Live session connection status
    connection: RwLock<ConnectionStatus>,

    /// Running transcript of the current/most recent call
    transcript: RwLock<Vec<TranscriptEntry>>,

    /// True while the remote model is speaking
    speaking: RwLock<bool>,

    /// Output level for visualization (0.0 to 1.0)
    output_level: RwLock<f32>,

    /// Event broadcaster for SSE events
    events: EventBus,
}

impl SharedState {
    pub fn new(events: EventBus) -> Self {
        Self {
            connection: RwLock::new(ConnectionStatus::Disconnected),
            transcript: RwLock::new(Vec::new()),
            speaking: RwLock::new(false),
            output_level: RwLock::new(0.0),
            events,
        }
    }

    /// The event bus shared with the SSE surface
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.connection.read().await.clone()
    }

    pub async fn set_connection_status(&self, status: ConnectionStatus) {
        *self.connection.write().await = status.clone();
        self.events.emit_lossy(EngineEvent::CallStatusChanged {
            status,
            timestamp: chrono::Utc::now(),
        });
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().await.clone()
    }

    pub async fn clear_transcript(&self) {
        self.transcript.write().await.clear();
    }

    /// Append a transcript line and broadcast it
    pub async fn append_transcript(&self, role: SpeakerRole, text: String) -> TranscriptEntry {
        let entry = TranscriptEntry {
            id: Uuid::new_v4(),
            role,
            text,
        };
        self.transcript.write().await.push(entry.clone());
        self.events.emit_lossy(EngineEvent::TranscriptAppended {
            entry: entry.clone(),
            timestamp: chrono::Utc::now(),
        });
        entry
    }

    pub async fn is_speaking(&self) -> bool {
        *self.speaking.read().await
    }

    /// Update the voice-activity flag, broadcasting only actual changes
    pub async fn set_speaking(&self, speaking: bool) {
        let mut current = self.speaking.write().await;
        if *current == speaking {
            return;
        }
        *current = speaking;
        self.events.emit_lossy(EngineEvent::SpeakingChanged {
            speaking,
            timestamp: chrono::Utc::now(),
        });
    }

    pub async fn output_level(&self) -> f32 {
        *self.output_level.read().await
    }

    pub async fn set_output_level(&self, level: f32) {
        *self.output_level.write().await = level.clamp(0.0, 1.0);
    }
}
