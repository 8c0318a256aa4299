//! Streaming playback scheduler
//!
//! Turns independently-timed inbound audio fragments into gapless output on
//! the device clock, and cuts everything off instantly on barge-in.
//!
//! # State
//!
//! The scheduler owns the commit cursor (`next_commit`), the set of in-flight
//! scheduled buffers, the session attempt counter and the mute flag. All of
//! it lives on the scheduler object and is read fresh on every call; nothing
//! is captured by value at callback-registration time.
//!
//! # Attempt guarding
//!
//! Every entry point takes the caller's captured attempt id and compares it
//! against the current one before touching state or the device. A stale id
//! is dropped with a debug log: no mutation, no device call. Disconnecting
//! and reconnecting therefore cannot interleave: the late callback from
//! attempt N-1 fails the guard once attempt N exists.
//!
//! # Interruption
//!
//! `handle_interrupted` is fully synchronous - no awaits - so that by the
//! time the interruption signal is processed, nothing scheduled before it can
//! still be heard and nothing computed before it can still be committed. The
//! inner mutex is a `std::sync::Mutex` and no critical section awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use voxcast_common::telemetry::{TelemetryLevel, TelemetryRecorder};

use crate::audio::output::{BufferId, OutputDevice};
use crate::audio::types::{decode_pcm16, AudioData};
use crate::error::Result;

/// Scheduler timing parameters
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum lead time the device needs to schedule without glitching
    pub safety_margin: Duration,
    /// Cursor offset after an interruption so the next fragment does not
    /// overlap a stopped buffer
    pub restart_epsilon: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_millis(20),
            restart_epsilon: Duration::from_millis(10),
        }
    }
}

/// One buffer handed to the output device and not yet finished
#[derive(Debug, Clone)]
struct ScheduledBuffer {
    start_at: Duration,
    duration: Duration,
}

struct SchedulerInner {
    /// Device-clock timestamp at which the next fragment may begin
    next_commit: Duration,
    active: HashMap<BufferId, ScheduledBuffer>,
}

/// Commit-queue scheduler for one live session's output path.
pub struct StreamScheduler {
    output: Arc<dyn OutputDevice>,
    inner: Mutex<SchedulerInner>,
    attempt: AtomicU64,
    muted: AtomicBool,
    config: SchedulerConfig,
    telemetry: Arc<TelemetryRecorder>,
}

impl StreamScheduler {
    pub fn new(
        output: Arc<dyn OutputDevice>,
        config: SchedulerConfig,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            output,
            inner: Mutex::new(SchedulerInner {
                next_commit: Duration::ZERO,
                active: HashMap::new(),
            }),
            attempt: AtomicU64::new(0),
            muted: AtomicBool::new(false),
            config,
            telemetry,
        }
    }

    /// Current session attempt id
    pub fn current_attempt(&self) -> u64 {
        self.attempt.load(Ordering::Acquire)
    }

    /// Mint a new attempt id for a connect request. Everything captured under
    /// an earlier id becomes stale immediately.
    pub fn begin_attempt(&self) -> u64 {
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel) + 1;
        let mut inner = self.inner.lock().unwrap();
        inner.next_commit = Duration::ZERO;
        inner.active.clear();
        attempt
    }

    /// Invalidate all in-flight work (disconnect path). Returns the new id.
    pub fn invalidate(&self) -> u64 {
        self.attempt.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True when `attempt` is still the live one
    pub fn is_current(&self, attempt: u64) -> bool {
        self.current_attempt() == attempt
    }

    /// Commit one inbound audio fragment to the output.
    ///
    /// Fragments for a stale attempt are dropped without touching the device.
    pub fn handle_fragment(&self, attempt: u64, fragment: &AudioData) -> Result<()> {
        if !self.is_current(attempt) {
            debug!("dropping audio fragment from stale attempt {}", attempt);
            return Ok(());
        }

        self.reap_completed();

        let buffer = decode_pcm16(fragment)?;
        let duration = buffer.duration();

        let mut inner = self.inner.lock().unwrap();
        let now = self.output.clock();
        let start_at = inner.next_commit.max(now + self.config.safety_margin);

        let id = self.output.schedule(buffer, start_at)?;
        inner.active.insert(id, ScheduledBuffer { start_at, duration });
        inner.next_commit = start_at + duration;

        Ok(())
    }

    /// Barge-in: stop everything now.
    ///
    /// Synchronous by design. After this returns, the active set is empty,
    /// the commit cursor sits just past the current instant, and any
    /// mid-flight gain ramp is cancelled with the gain pinned to full volume
    /// so new audio is not silenced.
    pub fn handle_interrupted(&self, attempt: u64) {
        if !self.is_current(attempt) {
            debug!("ignoring interruption from stale attempt {}", attempt);
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        let stopped = inner.active.len();
        let cut_until = inner
            .active
            .values()
            .map(|b| b.start_at + b.duration)
            .max()
            .unwrap_or(Duration::ZERO);
        for (id, _) in inner.active.drain() {
            // Stop tolerates buffers that already ended naturally
            self.output.stop(id);
        }
        inner.next_commit = self.output.clock() + self.config.restart_epsilon;
        self.output.cancel_ramp();

        self.telemetry.record(
            TelemetryLevel::Info,
            "scheduler",
            format!("barge-in: stopped {} active buffer(s)", stopped),
            Some(serde_json::json!({
                "cut_until_ms": cut_until.as_millis() as u64,
                "resume_at_ms": inner.next_commit.as_millis() as u64,
            })),
        );
    }

    /// Drop buffers that the device reports as naturally finished
    pub fn reap_completed(&self) {
        let completed = self.output.take_completed();
        if completed.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for id in completed {
            inner.active.remove(&id);
        }
    }

    /// Stop and forget all active buffers (disconnect path)
    pub fn stop_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (id, _) in inner.active.drain() {
            self.output.stop(id);
        }
        inner.next_commit = Duration::ZERO;
    }

    /// Mute gate for the capture path. Frames are dropped, never buffered,
    /// while muted.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Flip the mute gate, returning the new value
    pub fn toggle_muted(&self) -> bool {
        // Single writer (the UI thread of control); a plain flip is enough
        let muted = !self.is_muted();
        self.set_muted(muted);
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Number of in-flight buffers (after reaping finished ones)
    pub fn active_count(&self) -> usize {
        self.reap_completed();
        self.inner.lock().unwrap().active.len()
    }

    /// Device-clock timestamp at which the next fragment would begin
    pub fn next_commit_time(&self) -> Duration {
        self.inner.lock().unwrap().next_commit
    }
}

// ========================================
// Tests
// ========================================
