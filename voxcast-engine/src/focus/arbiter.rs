//! Audio focus arbiter
//!
//! Single source of truth for which producer (background podcast playback or
//! the live call session) may emit sound, and orchestrator of the hand-off
//! between them.
//!
//! # Lifecycle
//!
//! One arbiter instance exists per audio session. It is constructed
//! explicitly and passed by `Arc` to the call session and the HTTP layer;
//! there is no process-wide global. The UI layer registers its
//! [`PlaybackController`] capability on startup and unregisters it on
//! teardown.
//!
//! # Serialization
//!
//! All focus transitions run under one async mutex held across the whole
//! operation, including fade waits and the `on_start` callback. Callbacks
//! passed into `start_call_session`/`end_call_session` must not call back
//! into the arbiter.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use voxcast_common::events::{AudioFocus, EngineEvent, EventBus, InterruptMode};
use voxcast_common::telemetry::{TelemetryLevel, TelemetryRecorder};

use crate::error::Result;

/// Capability contract for the background playback element, owned by the UI
/// layer and registered into the arbiter.
///
/// The arbiter never owns the underlying audio resource; it holds this
/// capability only between register and unregister.
pub trait PlaybackController: Send + Sync {
    /// Start or resume playback
    fn play(&self) -> Result<()>;

    /// Pause playback
    fn pause(&self);

    /// Ramp the playback volume to `volume` over `duration`
    fn fade_to(&self, volume: f32, duration: Duration);

    /// True while the element is actually producing sound
    fn is_playing(&self) -> bool;

    /// Current playback position
    fn current_time(&self) -> Duration;
}

/// Fade timings and duck level for focus hand-offs
#[derive(Debug, Clone)]
pub struct FocusConfig {
    /// Fade-out before pausing playback for a call
    pub pause_fade: Duration,
    /// Fade down to the duck level when ducking under a call
    pub duck_fade: Duration,
    /// Fade back to full volume after a call ends
    pub resume_fade: Duration,
    /// Playback volume while ducked under a call
    pub duck_level: f32,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            pause_fade: Duration::from_millis(300),
            duck_fade: Duration::from_millis(500),
            resume_fade: Duration::from_millis(500),
            duck_level: 0.15,
        }
    }
}

/// Snapshot of arbiter state for the debug surface
#[derive(Debug, Clone, Serialize)]
pub struct FocusDebugState {
    pub focus: AudioFocus,
    pub resume_needed: bool,
    pub interrupt_mode: InterruptMode,
    pub has_controller: bool,
    /// Current playback position in seconds, when a controller is registered
    pub current_playback_time: Option<f64>,
}

struct FocusInner {
    focus: AudioFocus,
    controller: Option<Arc<dyn PlaybackController>>,
    /// Which interrupt action was applied when the current call started, and
    /// therefore which undo applies at call end. `None` = no resume needed.
    resume_action: Option<InterruptMode>,
}

/// Arbitrates the shared audio output between podcast playback and the live
/// call session.
pub struct FocusArbiter {
    inner: Mutex<FocusInner>,
    mode: RwLock<InterruptMode>,
    config: FocusConfig,
    telemetry: Arc<TelemetryRecorder>,
    events: EventBus,
}

impl FocusArbiter {
    pub fn new(
        config: FocusConfig,
        mode: InterruptMode,
        telemetry: Arc<TelemetryRecorder>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Mutex::new(FocusInner {
                focus: AudioFocus::None,
                controller: None,
                resume_action: None,
            }),
            mode: RwLock::new(mode),
            config,
            telemetry,
            events,
        }
    }

    /// Bind the playback capability. Replaces any previous registration.
    pub async fn register_playback_controller(&self, controller: Arc<dyn PlaybackController>) {
        let mut inner = self.inner.lock().await;
        inner.controller = Some(controller);
        self.telemetry.info("focus", "playback controller registered");
    }

    /// Clear the playback capability.
    ///
    /// Also forces focus back to `None` and clears any pending resume: with
    /// no controller there is nothing left to arbitrate or resume.
    pub async fn unregister_playback_controller(&self) {
        let mut inner = self.inner.lock().await;
        inner.controller = None;
        inner.resume_action = None;
        self.set_focus(&mut inner, AudioFocus::None);
        self.telemetry.info("focus", "playback controller unregistered");
    }

    /// Ask for permission to start podcast playback.
    ///
    /// Returns false (denied) iff a call currently owns the output. Must be
    /// called immediately before the player begins producing sound.
    pub async fn request_playback_start(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.focus == AudioFocus::Call {
            self.telemetry
                .info("focus", "playback start denied: call owns the output");
            return false;
        }
        self.set_focus(&mut inner, AudioFocus::Podcast);
        true
    }

    /// Report that podcast playback stopped on its own.
    ///
    /// Idempotent: a no-op unless podcast playback currently holds focus.
    pub async fn report_playback_stopped(&self) {
        let mut inner = self.inner.lock().await;
        if inner.focus == AudioFocus::Podcast {
            self.set_focus(&mut inner, AudioFocus::None);
        }
    }

    /// Set how playback is interrupted when a call starts.
    ///
    /// Takes effect for the next call session; the current one keeps the
    /// action it already applied.
    pub fn set_interrupt_mode(&self, mode: InterruptMode) {
        *self.mode.write().unwrap() = mode;
        self.telemetry
            .info("focus", format!("interrupt mode set to {}", mode));
    }

    /// Current interrupt mode
    pub fn interrupt_mode(&self) -> InterruptMode {
        *self.mode.read().unwrap()
    }

    /// Take the output for a call session.
    ///
    /// Interrupts podcast playback according to the current interrupt mode,
    /// sets focus to `Call`, then runs `on_start` (typically: open the live
    /// transport). If `on_start` fails, the arbiter rolls back through the
    /// end-of-call path so focus and the resume flag stay consistent.
    pub async fn start_call_session<F, Fut>(&self, on_start: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut inner = self.inner.lock().await;

        if inner.focus == AudioFocus::Call {
            debug!("start_call_session: call already owns the output");
            return Ok(());
        }

        let mode = self.interrupt_mode();
        let playing = inner
            .controller
            .as_ref()
            .map(|c| c.is_playing())
            .unwrap_or(false);

        if inner.focus == AudioFocus::Podcast && playing {
            inner.resume_action = Some(mode);
            if let Some(controller) = inner.controller.clone() {
                match mode {
                    InterruptMode::Pause => {
                        // Fade down first purely as an anti-click measure,
                        // then reset volume so a later resume is not silent.
                        controller.fade_to(0.0, self.config.pause_fade);
                        tokio::time::sleep(self.config.pause_fade).await;
                        controller.pause();
                        controller.fade_to(1.0, Duration::ZERO);
                        self.telemetry.info("focus", "playback paused for call");
                    }
                    InterruptMode::Duck => {
                        controller.fade_to(self.config.duck_level, self.config.duck_fade);
                        self.telemetry.info("focus", "playback ducked for call");
                    }
                }
            }
        } else {
            inner.resume_action = None;
        }

        self.set_focus(&mut inner, AudioFocus::Call);

        if let Err(e) = on_start().await {
            self.telemetry.record(
                TelemetryLevel::Error,
                "focus",
                format!("call start failed, rolling back: {}", e),
                None,
            );
            self.finish_call(&mut inner).await;
            return Err(e);
        }

        Ok(())
    }

    /// Release the output after a call.
    ///
    /// `on_end` (the caller's own teardown, e.g. closing the live channel)
    /// runs unconditionally - even when no call was active - so the caller
    /// gets idempotent cleanup. Afterwards focus drops to `None` and, if
    /// playback was interrupted for this call, it is resumed or unducked.
    pub async fn end_call_session<F>(&self, on_end: F)
    where
        F: FnOnce(),
    {
        let mut inner = self.inner.lock().await;
        on_end();
        self.finish_call(&mut inner).await;
    }

    /// Shared end-of-call path; also the rollback path for a failed start.
    async fn finish_call(&self, inner: &mut FocusInner) {
        self.set_focus(inner, AudioFocus::None);

        if let Some(action) = inner.resume_action {
            if let Some(controller) = inner.controller.clone() {
                match action {
                    InterruptMode::Pause => {
                        // Start silent so the resume point does not click
                        controller.fade_to(0.0, Duration::ZERO);
                        match controller.play() {
                            Ok(()) => {
                                self.set_focus(inner, AudioFocus::Podcast);
                                controller.fade_to(1.0, self.config.resume_fade);
                                self.telemetry.info("focus", "playback resumed after call");
                                self.events.emit_lossy(EngineEvent::PlaybackResumed {
                                    mode: InterruptMode::Pause,
                                    timestamp: chrono::Utc::now(),
                                });
                            }
                            Err(e) => {
                                // Do not claim playback resumed when it did not
                                self.telemetry.record(
                                    TelemetryLevel::Error,
                                    "focus",
                                    format!("playback resume failed: {}", e),
                                    None,
                                );
                            }
                        }
                    }
                    InterruptMode::Duck => {
                        controller.fade_to(1.0, self.config.resume_fade);
                        self.set_focus(inner, AudioFocus::Podcast);
                        self.telemetry.info("focus", "playback unducked after call");
                        self.events.emit_lossy(EngineEvent::PlaybackResumed {
                            mode: InterruptMode::Duck,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
            } else {
                self.telemetry
                    .warn("focus", "resume requested with no controller registered");
            }
        }

        inner.resume_action = None;
    }

    fn set_focus(&self, inner: &mut FocusInner, focus: AudioFocus) {
        if inner.focus == focus {
            return;
        }
        inner.focus = focus;
        self.telemetry
            .info("focus", format!("focus changed to {}", focus));
        self.events.emit_lossy(EngineEvent::FocusChanged {
            focus,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Current focus owner
    pub async fn focus(&self) -> AudioFocus {
        self.inner.lock().await.focus
    }

    /// Snapshot for the debug surface
    pub async fn debug_state(&self) -> FocusDebugState {
        let inner = self.inner.lock().await;
        FocusDebugState {
            focus: inner.focus,
            resume_needed: inner.resume_action.is_some(),
            interrupt_mode: self.interrupt_mode(),
            has_controller: inner.controller.is_some(),
            current_playback_time: inner
                .controller
                .as_ref()
                .map(|c| c.current_time().as_secs_f64()),
        }
    }

    /// Serialize state + telemetry + environment into one downloadable
    /// diagnostic artifact.
    pub async fn export_debug_bundle(&self) -> serde_json::Value {
        let state = self.debug_state().await;
        serde_json::json!({
            "generated_at": chrono::Utc::now(),
            "state": state,
            "telemetry": self.telemetry.export(),
            "environment": {
                "package": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
            },
        })
    }

    /// Record a telemetry entry on behalf of a caller (the UI layer shares
    /// the same diagnostic sink).
    pub fn log(
        &self,
        level: TelemetryLevel,
        category: &str,
        message: &str,
        payload: Option<serde_json::Value>,
    ) {
        self.telemetry.record(level, category, message, payload);
    }
}

// ========================================
// Tests
// ========================================
