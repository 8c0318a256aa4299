//! Live call session
//!
//! Wires one duplex transport, the capture device and the streaming playback
//! scheduler into a connect/disconnect lifecycle with epoch-based
//! cancellation: every connect mints a new session attempt id, and every
//! async continuation re-checks its captured id before touching state or
//! hardware. Disconnect-then-reconnect races resolve themselves because the
//! late continuation from the old attempt fails the check.

pub mod scheduler;
pub mod transport;

pub use scheduler::{SchedulerConfig, StreamScheduler};
pub use transport::{LiveTransport, LoopbackTransport, TransportEvent};

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use voxcast_common::events::{ConnectionStatus, EngineEvent};
use voxcast_common::telemetry::{TelemetryLevel, TelemetryRecorder};

use crate::audio::capture::{CaptureDevice, CaptureFrame};
use crate::audio::output::OutputDevice;
use crate::audio::types::{encode_pcm16, AudioData};
use crate::error::{Error, Result};
use crate::state::SharedState;

/// Output level / reaper poll period
const METER_INTERVAL: Duration = Duration::from_millis(100);

/// One live conversation endpoint: owns the scheduler and the session
/// lifecycle, and is the hook the UI layer calls.
pub struct CallSession {
    scheduler: Arc<StreamScheduler>,
    transport: Arc<dyn LiveTransport>,
    capture: Arc<dyn CaptureDevice>,
    output: Arc<dyn OutputDevice>,
    state: Arc<SharedState>,
    telemetry: Arc<TelemetryRecorder>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        scheduler: Arc<StreamScheduler>,
        transport: Arc<dyn LiveTransport>,
        capture: Arc<dyn CaptureDevice>,
        output: Arc<dyn OutputDevice>,
        state: Arc<SharedState>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            scheduler,
            transport,
            capture,
            output,
            state,
            telemetry,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// The scheduler driving this session's output path
    pub fn scheduler(&self) -> &Arc<StreamScheduler> {
        &self.scheduler
    }

    /// Open the session: mint a new attempt, acquire the capture device,
    /// open the transport and start the processing loops.
    ///
    /// A failure surfaces once as `ConnectionStatus::Failed`; there is no
    /// automatic reconnect.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        // Re-connecting tears the previous session down first
        if self.state.connection_status().await != ConnectionStatus::Disconnected {
            self.disconnect().await;
        }

        self.state
            .set_connection_status(ConnectionStatus::Connecting)
            .await;
        self.state.clear_transcript().await;

        let attempt = self.scheduler.begin_attempt();
        self.telemetry
            .info("session", format!("connecting (attempt {})", attempt));

        let frames = match self.capture.start() {
            Ok(frames) => frames,
            Err(e) => {
                return self.fail_connect(attempt, e).await;
            }
        };

        let events = match self.transport.open().await {
            Ok(events) => events,
            Err(e) => {
                self.capture.stop();
                return self.fail_connect(attempt, e).await;
            }
        };

        // The attempt may have been invalidated while we awaited the
        // transport (disconnect racing connect)
        if !self.scheduler.is_current(attempt) {
            debug!("connect superseded before completion (attempt {})", attempt);
            self.capture.stop();
            self.transport.close().await;
            return Ok(());
        }

        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(tokio::spawn(Arc::clone(self).receive_loop(attempt, events)));
            tasks.push(tokio::spawn(Arc::clone(self).capture_loop(attempt, frames)));
            tasks.push(tokio::spawn(Arc::clone(self).meter_loop(attempt)));
        }

        self.state
            .set_connection_status(ConnectionStatus::Connected)
            .await;
        self.telemetry
            .info("session", format!("connected (attempt {})", attempt));
        Ok(())
    }

    /// Tear the session down. Safe to call repeatedly, mid-connect, and from
    /// a state where connect never fully succeeded.
    pub async fn disconnect(&self) {
        let attempt = self.scheduler.invalidate();
        self.scheduler.stop_all();
        self.capture.stop();
        self.transport.close().await;

        self.state.set_speaking(false).await;
        if self.state.connection_status().await != ConnectionStatus::Disconnected {
            self.state
                .set_connection_status(ConnectionStatus::Disconnected)
                .await;
        }
        self.telemetry
            .info("session", format!("disconnected (now attempt {})", attempt));

        // Abort loops last; one of them may be the caller's own task, in
        // which case nothing after its break point runs anyway
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.abort();
        }
    }

    /// Flip the microphone gate. While muted, captured frames are dropped,
    /// never buffered.
    pub fn toggle_mic(&self) -> bool {
        let muted = self.scheduler.toggle_muted();
        self.state.events().emit_lossy(EngineEvent::MicMuteChanged {
            muted,
            timestamp: chrono::Utc::now(),
        });
        self.telemetry.info(
            "session",
            if muted { "microphone muted" } else { "microphone live" },
        );
        muted
    }

    /// True while the microphone gate is closed
    pub fn is_mic_muted(&self) -> bool {
        self.scheduler.is_muted()
    }

    /// Send one video/image frame over the live channel
    pub async fn send_video_frame(&self, data: Vec<u8>, mime_type: &str) -> Result<()> {
        if !self.state.connection_status().await.is_connected() {
            return Err(Error::InvalidState(
                "cannot send video frame: session not connected".to_string(),
            ));
        }
        self.transport.send_image(data, mime_type).await
    }

    async fn fail_connect(&self, attempt: u64, error: Error) -> Result<()> {
        let message = error.to_string();
        self.telemetry.record(
            TelemetryLevel::Error,
            "session",
            format!("connect failed (attempt {}): {}", attempt, message),
            None,
        );
        self.state
            .set_connection_status(ConnectionStatus::Failed {
                message: message.clone(),
            })
            .await;
        Err(error)
    }

    /// Inbound transport events for one attempt.
    ///
    /// Every arm re-checks the attempt id first; a stale event mutates
    /// nothing and touches no hardware.
    async fn receive_loop(
        self: Arc<Self>,
        attempt: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.scheduler.is_current(attempt) {
                debug!("receive loop: attempt {} superseded, exiting", attempt);
                break;
            }

            match event {
                TransportEvent::Audio(fragment) => {
                    self.state.set_speaking(true).await;
                    if let Err(e) = self.scheduler.handle_fragment(attempt, &fragment) {
                        self.telemetry.record(
                            TelemetryLevel::Error,
                            "scheduler",
                            format!("failed to commit audio fragment: {}", e),
                            None,
                        );
                    }
                }
                TransportEvent::Text { text, role } => {
                    self.state.append_transcript(role, text).await;
                }
                TransportEvent::TurnComplete => {
                    self.state.set_speaking(false).await;
                }
                TransportEvent::Interrupted => {
                    // Must cut playback synchronously with the signal
                    self.scheduler.handle_interrupted(attempt);
                    self.state.set_speaking(false).await;
                }
                TransportEvent::Closed => {
                    self.telemetry.info("session", "transport closed");
                    if self.scheduler.is_current(attempt) {
                        self.disconnect().await;
                    }
                    break;
                }
                TransportEvent::Error(message) => {
                    self.fail_session(attempt, message).await;
                    break;
                }
            }
        }
    }

    /// Outbound microphone frames for one attempt. Send failures are logged
    /// and swallowed; they must never crash the capture loop.
    async fn capture_loop(
        self: Arc<Self>,
        attempt: u64,
        mut frames: mpsc::Receiver<CaptureFrame>,
    ) {
        let sample_rate = self.capture.sample_rate();

        while let Some(frame) = frames.recv().await {
            if !self.scheduler.is_current(attempt) {
                debug!("capture loop: attempt {} superseded, exiting", attempt);
                break;
            }
            if self.scheduler.is_muted() {
                continue;
            }

            let fragment = AudioData::new(encode_pcm16(&frame.samples), sample_rate, 1);
            if let Err(e) = self.transport.send_audio(fragment).await {
                warn!("dropping captured frame, send failed: {}", e);
            }
        }
    }

    /// Housekeeping: reap finished buffers and publish the output level.
    async fn meter_loop(self: Arc<Self>, attempt: u64) {
        let mut interval = tokio::time::interval(METER_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if !self.scheduler.is_current(attempt) {
                break;
            }

            self.scheduler.reap_completed();
            let level = self.output.output_level();
            self.state.set_output_level(level).await;
            self.state.events().emit_lossy(EngineEvent::OutputLevel {
                level,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Session-level failure: surface once as state, tear down quietly.
    async fn fail_session(&self, attempt: u64, message: String) {
        if !self.scheduler.is_current(attempt) {
            return;
        }
        self.telemetry.record(
            TelemetryLevel::Error,
            "session",
            format!("transport error: {}", message),
            None,
        );
        self.scheduler.invalidate();
        self.scheduler.stop_all();
        self.capture.stop();
        self.state.set_speaking(false).await;
        self.state
            .set_connection_status(ConnectionStatus::Failed { message })
            .await;
    }
}
