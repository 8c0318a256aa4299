//! Live transport seam
//!
//! The duplex channel to the remote generative voice model. The engine
//! consumes this contract; it does not own the wire protocol. Inbound
//! payloads are a tagged enum so the session receive loop can match them
//! exhaustively.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use voxcast_common::events::SpeakerRole;

use crate::audio::AudioData;
use crate::error::{Error, Result};

/// Inbound events from the live transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One spoken-audio fragment from the model
    Audio(AudioData),
    /// A transcript fragment (either side of the conversation)
    Text { text: String, role: SpeakerRole },
    /// The model finished its current response
    TurnComplete,
    /// The user's speech interrupted the model mid-response
    Interrupted,
    /// The channel closed normally
    Closed,
    /// The channel failed
    Error(String),
}

/// Open duplex channel accepting audio/image fragments and emitting
/// [`TransportEvent`]s.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open the channel and return the inbound event stream
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Close the channel. Safe to call when not open.
    async fn close(&self);

    /// Send one captured audio fragment
    async fn send_audio(&self, fragment: AudioData) -> Result<()>;

    /// Send one video/image frame
    async fn send_image(&self, data: Vec<u8>, mime_type: &str) -> Result<()>;
}

/// Local loopback transport for development and smoke tests.
///
/// Echoes every sent audio fragment back as a model audio event, so the whole
/// mic → transport → scheduler → speaker path can be exercised without a
/// remote endpoint. Wired by the binary when no remote transport is
/// configured.
pub struct LoopbackTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(None),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveTransport for LoopbackTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().await = Some(tx);
        debug!("loopback transport open");
        Ok(rx)
    }

    async fn close(&self) {
        if let Some(tx) = self.events.lock().await.take() {
            let _ = tx.send(TransportEvent::Closed).await;
        }
        debug!("loopback transport closed");
    }

    async fn send_audio(&self, fragment: AudioData) -> Result<()> {
        let guard = self.events.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("loopback transport is not open".to_string()))?;
        tx.send(TransportEvent::Audio(fragment))
            .await
            .map_err(|_| Error::Transport("loopback receiver dropped".to_string()))
    }

    async fn send_image(&self, data: Vec<u8>, _mime_type: &str) -> Result<()> {
        // Nothing meaningful to echo for images
        debug!("loopback transport dropping {} byte image frame", data.len());
        Ok(())
    }
}
