//! Shared test doubles for the integration suites
//!
//! Mocks for the four external seams: output device (manual clock), capture
//! device (frame injection), live transport (scripted events), and synthesis
//! backend (per-chunk failure plans).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxcast_engine::audio::capture::{CaptureDevice, CaptureFrame};
use voxcast_engine::audio::output::{BufferId, OutputDevice};
use voxcast_engine::audio::{AudioBuffer, AudioData};
use voxcast_engine::error::{Error, Result};
use voxcast_engine::session::{LiveTransport, TransportEvent};
use voxcast_engine::synthesis::{ScriptChunk, SpeechBackend, VoiceMap};

// ========================================
// Output device with a manual clock
// ========================================

pub struct ManualOutput {
    clock: StdMutex<Duration>,
    next_id: AtomicU64,
    pub scheduled: StdMutex<Vec<(BufferId, Duration, Duration)>>,
    pub stopped: StdMutex<Vec<BufferId>>,
    completed: StdMutex<Vec<BufferId>>,
    pub ramp_cancelled: AtomicBool,
    gain: StdMutex<f32>,
    level: StdMutex<f32>,
}

impl ManualOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: StdMutex::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
            scheduled: StdMutex::new(Vec::new()),
            stopped: StdMutex::new(Vec::new()),
            completed: StdMutex::new(Vec::new()),
            ramp_cancelled: AtomicBool::new(false),
            gain: StdMutex::new(1.0),
            level: StdMutex::new(0.0),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.clock.lock().unwrap() += by;
    }

    pub fn mark_completed(&self, id: BufferId) {
        self.completed.lock().unwrap().push(id);
    }

    pub fn schedule_calls(&self) -> Vec<(BufferId, Duration, Duration)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn stopped_ids(&self) -> Vec<BufferId> {
        self.stopped.lock().unwrap().clone()
    }
}

impl OutputDevice for ManualOutput {
    fn clock(&self) -> Duration {
        *self.clock.lock().unwrap()
    }

    fn schedule(&self, buffer: AudioBuffer, start_at: Duration) -> Result<BufferId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scheduled
            .lock()
            .unwrap()
            .push((id, start_at, buffer.duration()));
        Ok(id)
    }

    fn stop(&self, id: BufferId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn take_completed(&self) -> Vec<BufferId> {
        std::mem::take(&mut self.completed.lock().unwrap())
    }

    fn set_gain(&self, gain: f32) {
        *self.gain.lock().unwrap() = gain;
    }

    fn gain(&self) -> f32 {
        *self.gain.lock().unwrap()
    }

    fn ramp_gain(&self, target: f32, _duration: Duration) {
        *self.gain.lock().unwrap() = target;
    }

    fn cancel_ramp(&self) {
        self.ramp_cancelled.store(true, Ordering::SeqCst);
        *self.gain.lock().unwrap() = 1.0;
    }

    fn output_level(&self) -> f32 {
        *self.level.lock().unwrap()
    }

    fn suspend(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

// ========================================
// Capture device with frame injection
// ========================================

pub struct MockCapture {
    sample_rate: u32,
    sender: StdMutex<Option<mpsc::Sender<CaptureFrame>>>,
    pub fail_start: AtomicBool,
}

impl MockCapture {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            sender: StdMutex::new(None),
            fail_start: AtomicBool::new(false),
        })
    }

    /// Feed one frame into the session's capture loop
    pub async fn inject(&self, samples: Vec<f32>) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(CaptureFrame { samples }).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

impl CaptureDevice for MockCapture {
    fn start(&self) -> Result<mpsc::Receiver<CaptureFrame>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Capture("microphone permission denied".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        self.sender.lock().unwrap().take();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ========================================
// Scripted live transport
// ========================================

pub struct ScriptedTransport {
    events: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
    pub sent_audio: StdMutex<Vec<AudioData>>,
    pub sent_images: StdMutex<Vec<(Vec<u8>, String)>>,
    pub fail_open: AtomicBool,
    pub fail_send: AtomicBool,
    pub close_count: AtomicU64,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: StdMutex::new(None),
            sent_audio: StdMutex::new(Vec::new()),
            sent_images: StdMutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            close_count: AtomicU64::new(0),
        })
    }

    /// Deliver one inbound event to the session's receive loop
    pub async fn push(&self, event: TransportEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub fn sent_audio_count(&self) -> usize {
        self.sent_audio.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Transport("duplex channel refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }

    async fn send_audio(&self, fragment: AudioData) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport momentarily unready".to_string()));
        }
        self.sent_audio.lock().unwrap().push(fragment);
        Ok(())
    }

    async fn send_image(&self, data: Vec<u8>, mime_type: &str) -> Result<()> {
        self.sent_images
            .lock()
            .unwrap()
            .push((data, mime_type.to_string()));
        Ok(())
    }
}

// ========================================
// Synthesis backend with per-chunk plans
// ========================================

#[derive(Debug, Clone, Copy)]
pub enum ChunkPlan {
    /// Succeed on the first attempt
    Succeed,
    /// Fail with an error `n` times, then succeed
    FailTimes(usize),
    /// Every response is an error
    AlwaysFail,
    /// Every response is Ok but carries no audio payload
    AlwaysEmpty,
}

pub struct FlakyBackend {
    plans: StdMutex<HashMap<String, ChunkPlan>>,
    attempts: StdMutex<HashMap<String, usize>>,
    /// (chunk text, paused-clock instant) per synthesize call
    pub calls: StdMutex<Vec<(String, tokio::time::Instant)>>,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            plans: StdMutex::new(HashMap::new()),
            attempts: StdMutex::new(HashMap::new()),
            calls: StdMutex::new(Vec::new()),
        })
    }

    pub fn plan(&self, text: &str, plan: ChunkPlan) {
        self.plans.lock().unwrap().insert(text.to_string(), plan);
    }

    pub fn attempts_for(&self, text: &str) -> usize {
        self.attempts.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    /// Delays between successive attempts for one chunk
    pub fn delays_for(&self, text: &str) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        let instants: Vec<_> = calls
            .iter()
            .filter(|(t, _)| t == text)
            .map(|(_, at)| *at)
            .collect();
        instants
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

#[async_trait]
impl SpeechBackend for FlakyBackend {
    async fn synthesize(&self, chunk: &ScriptChunk, _voices: &VoiceMap) -> Result<AudioData> {
        self.calls
            .lock()
            .unwrap()
            .push((chunk.text.clone(), tokio::time::Instant::now()));

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(chunk.text.clone()).or_insert(0);
            *entry += 1;
            *entry - 1
        };

        let plan = self
            .plans
            .lock()
            .unwrap()
            .get(&chunk.text)
            .copied()
            .unwrap_or(ChunkPlan::Succeed);

        match plan {
            ChunkPlan::Succeed => Ok(fragment_for(&chunk.text)),
            ChunkPlan::FailTimes(n) if attempt < n => {
                Err(Error::Synthesis("backend unavailable".to_string()))
            }
            ChunkPlan::FailTimes(_) => Ok(fragment_for(&chunk.text)),
            ChunkPlan::AlwaysFail => Err(Error::Synthesis("backend unavailable".to_string())),
            ChunkPlan::AlwaysEmpty => Ok(AudioData::new(Vec::new(), 24000, 1)),
        }
    }
}

/// A recognizable fragment whose payload is the chunk text itself
pub fn fragment_for(text: &str) -> AudioData {
    AudioData::new(text.as_bytes().to_vec(), 24000, 1)
}

// ========================================
// Recording playback controller
// ========================================

/// One observed controller call, for order-sensitive assertions
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCall {
    Play,
    Pause,
    /// (target volume, duration in ms)
    FadeTo(f32, u64),
}

pub struct RecordingController {
    playing: AtomicBool,
    pub fail_play: AtomicBool,
    calls: StdMutex<Vec<ControllerCall>>,
}

impl RecordingController {
    pub fn new(playing: bool) -> Arc<Self> {
        Arc::new(Self {
            playing: AtomicBool::new(playing),
            fail_play: AtomicBool::new(false),
            calls: StdMutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl voxcast_engine::focus::PlaybackController for RecordingController {
    fn play(&self) -> Result<()> {
        self.calls.lock().unwrap().push(ControllerCall::Play);
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("element refused to play".to_string()));
        }
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.calls.lock().unwrap().push(ControllerCall::Pause);
        self.playing.store(false, Ordering::SeqCst);
    }

    fn fade_to(&self, volume: f32, duration: Duration) {
        self.calls
            .lock()
            .unwrap()
            .push(ControllerCall::FadeTo(volume, duration.as_millis() as u64));
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn current_time(&self) -> Duration {
        Duration::from_secs(12)
    }
}

// ========================================
// Misc helpers
// ========================================

/// 100 ms of 16 kHz mono PCM16 silence
pub fn fragment_100ms() -> AudioData {
    AudioData::new(vec![0u8; 1600 * 2], 16000, 1)
}

/// Poll `cond` until it holds or `timeout` expires
pub async fn wait_for<F>(mut cond: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
