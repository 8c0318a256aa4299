//! Audio output device seam and cpal adapter
//!
//! The scheduler talks to the output through the [`OutputDevice`] trait: a
//! device clock, timestamped buffer scheduling, forced stop, and a gain stage
//! with ramps. [`CpalOutput`] is the production adapter.
//!
//! # Architecture
//!
//! The cpal stream lives on a dedicated thread (cpal streams are not Send).
//! The handle and the audio callback share a [`PlayoutState`]; the callback
//! never blocks on anything the async side holds for long - buffer list and
//! ramp state are behind short-lived mutexes, everything else is atomics, and
//! naturally-ended buffer ids leave through a lock-free ring.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::audio::types::AudioBuffer;
use crate::error::{Error, Result};

/// Identifier for a buffer handed to the output device
pub type BufferId = u64;

/// Capacity of the completed-buffer id ring (ids, not samples)
const COMPLETION_RING_CAPACITY: usize = 256;

/// Scheduled audio output with a device clock and a gain stage.
///
/// All methods are synchronous: interruption handling must be able to stop
/// buffers and pin the gain without awaiting.
pub trait OutputDevice: Send + Sync {
    /// Current position of the device clock (monotonic, starts near zero)
    fn clock(&self) -> Duration;

    /// Schedule a buffer to begin playing at `start_at` on the device clock.
    ///
    /// A `start_at` already in the past begins playback immediately.
    fn schedule(&self, buffer: AudioBuffer, start_at: Duration) -> Result<BufferId>;

    /// Forcibly stop a scheduled buffer. Stopping a buffer that already ended
    /// naturally is a no-op, not an error.
    fn stop(&self, id: BufferId);

    /// Drain the ids of buffers that ended naturally since the last call
    fn take_completed(&self) -> Vec<BufferId>;

    /// Set the gain immediately, cancelling any ramp
    fn set_gain(&self, gain: f32);

    /// Current gain value (mid-ramp values included)
    fn gain(&self) -> f32;

    /// Ramp the gain to `target` over `duration`, replacing any active ramp
    fn ramp_gain(&self, target: f32, duration: Duration);

    /// Cancel any in-flight ramp and pin the gain to full volume now
    fn cancel_ramp(&self);

    /// Most recent output peak level, 0.0 to 1.0, for visualization
    fn output_level(&self) -> f32;

    /// Suspend the underlying stream
    fn suspend(&self) -> Result<()>;

    /// Resume the underlying stream
    fn resume(&self) -> Result<()>;
}

// ========================================
// Playout state shared with the callback
// ========================================

struct ActiveBuffer {
    id: BufferId,
    /// Absolute device frame at which this buffer begins
    start_frame: u64,
    /// Next frame to read from the buffer
    cursor: usize,
    samples: Arc<Vec<f32>>,
    channels: u16,
}

impl ActiveBuffer {
    fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Sample for one output frame, mono-summed
    fn frame_value(&self, frame: usize) -> f32 {
        let base = frame * self.channels as usize;
        // Multi-channel buffers contribute their first channel; the voice
        // paths are mono end to end.
        self.samples.get(base).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct GainRamp {
    from: f32,
    to: f32,
    start_frame: u64,
    duration_frames: u64,
}

impl GainRamp {
    fn value_at(&self, frame: u64) -> f32 {
        if self.duration_frames == 0 {
            return self.to;
        }
        let elapsed = frame.saturating_sub(self.start_frame);
        let progress = (elapsed as f64 / self.duration_frames as f64).min(1.0) as f32;
        self.from + (self.to - self.from) * progress
    }

    fn finished_at(&self, frame: u64) -> bool {
        frame.saturating_sub(self.start_frame) >= self.duration_frames
    }
}

struct PlayoutState {
    sample_rate: u32,
    frames_rendered: AtomicU64,
    next_id: AtomicU64,
    playing: Mutex<Vec<ActiveBuffer>>,
    gain_bits: AtomicU32,
    ramp: Mutex<Option<GainRamp>>,
    level_bits: AtomicU32,
    completed_tx: Mutex<HeapProd<BufferId>>,
    completed_rx: Mutex<HeapCons<BufferId>>,
}

impl PlayoutState {
    fn new(sample_rate: u32) -> Self {
        let ring = HeapRb::<BufferId>::new(COMPLETION_RING_CAPACITY);
        let (tx, rx) = ring.split();

        Self {
            sample_rate,
            frames_rendered: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            playing: Mutex::new(Vec::new()),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            ramp: Mutex::new(None),
            level_bits: AtomicU32::new(0.0f32.to_bits()),
            completed_tx: Mutex::new(tx),
            completed_rx: Mutex::new(rx),
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Acquire))
    }

    fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    /// Mix one callback period into `mix`, mono frames
    fn render(&self, mix: &mut [f32]) {
        let start = self.frames_rendered.load(Ordering::Acquire);
        let mut playing = self.playing.lock().unwrap();
        let mut completed = self.completed_tx.lock().unwrap();

        // Lock the ramp once per period, not per frame
        let mut ramp_guard = self.ramp.lock().unwrap();
        let ramp = *ramp_guard;
        let flat_gain = self.gain();

        for (offset, slot) in mix.iter_mut().enumerate() {
            let frame = start + offset as u64;
            let mut value = 0.0f32;

            for buffer in playing.iter_mut() {
                if frame < buffer.start_frame {
                    continue;
                }
                if buffer.cursor < buffer.frame_count() {
                    value += buffer.frame_value(buffer.cursor);
                    buffer.cursor += 1;
                }
            }

            let gain = match ramp.as_ref() {
                Some(ramp) => ramp.value_at(frame),
                None => flat_gain,
            };
            *slot = value * gain;
        }

        // Commit the gain reached this period and retire a finished ramp
        let end_frame = start + mix.len() as u64;
        if let Some(active) = ramp {
            self.set_gain(active.value_at(end_frame));
            if active.finished_at(end_frame) {
                *ramp_guard = None;
            }
        }
        drop(ramp_guard);

        // Retire buffers that played out naturally
        playing.retain(|buffer| {
            if buffer.cursor >= buffer.frame_count() {
                if completed.try_push(buffer.id).is_err() {
                    warn!("completion ring full, dropping end notice for buffer {}", buffer.id);
                }
                false
            } else {
                true
            }
        });

        let peak = mix.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.level_bits
            .store(peak.min(1.0).to_bits(), Ordering::Release);
        self.frames_rendered
            .fetch_add(mix.len() as u64, Ordering::AcqRel);
    }
}

// ========================================
// cpal adapter
// ========================================

enum StreamCommand {
    Suspend,
    Resume,
    Shutdown,
}

/// Production output adapter backed by cpal.
///
/// The device clock is derived from frames actually rendered by the audio
/// callback, so scheduled start times line up with what the hardware plays.
pub struct CpalOutput {
    state: Arc<PlayoutState>,
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// List available audio output device names
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the output device and start the stream on its own thread.
    ///
    /// # Arguments
    /// - `device_name`: optional device name (None = default device)
    /// - `sample_rate`: requested playout sample rate in Hz
    pub fn open(device_name: Option<String>, sample_rate: u32) -> Result<Self> {
        let state = Arc::new(PlayoutState::new(sample_rate));
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("voxcast-output".to_string())
            .spawn(move || {
                stream_thread(device_name, sample_rate, thread_state, cmd_rx, ready_tx);
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        // Wait for the stream to come up (or fail) before returning
        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio output stream started at {} Hz", sample_rate);
                Ok(Self {
                    state,
                    commands: cmd_tx,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::AudioOutput(
                "Output thread exited before reporting readiness".to_string(),
            )),
        }
    }
}

impl OutputDevice for CpalOutput {
    fn clock(&self) -> Duration {
        let frames = self.state.frames_rendered.load(Ordering::Acquire);
        Duration::from_secs_f64(frames as f64 / self.state.sample_rate as f64)
    }

    fn schedule(&self, buffer: AudioBuffer, start_at: Duration) -> Result<BufferId> {
        if buffer.samples.is_empty() {
            return Err(Error::AudioOutput("Cannot schedule an empty buffer".to_string()));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let start_frame = (start_at.as_secs_f64() * self.state.sample_rate as f64).round() as u64;

        let mut playing = self.state.playing.lock().unwrap();
        playing.push(ActiveBuffer {
            id,
            start_frame,
            cursor: 0,
            samples: Arc::clone(&buffer.samples),
            channels: buffer.channels,
        });

        Ok(id)
    }

    fn stop(&self, id: BufferId) {
        let mut playing = self.state.playing.lock().unwrap();
        playing.retain(|buffer| buffer.id != id);
    }

    fn take_completed(&self) -> Vec<BufferId> {
        let mut rx = self.state.completed_rx.lock().unwrap();
        let mut ids = Vec::new();
        while let Some(id) = rx.try_pop() {
            ids.push(id);
        }
        ids
    }

    fn set_gain(&self, gain: f32) {
        *self.state.ramp.lock().unwrap() = None;
        self.state.set_gain(gain);
    }

    fn gain(&self) -> f32 {
        self.state.gain()
    }

    fn ramp_gain(&self, target: f32, duration: Duration) {
        let now = self.state.frames_rendered.load(Ordering::Acquire);
        let duration_frames =
            (duration.as_secs_f64() * self.state.sample_rate as f64).round() as u64;

        let mut ramp = self.state.ramp.lock().unwrap();
        *ramp = Some(GainRamp {
            from: self.state.gain(),
            to: target.clamp(0.0, 1.0),
            start_frame: now,
            duration_frames,
        });
    }

    fn cancel_ramp(&self) {
        *self.state.ramp.lock().unwrap() = None;
        self.state.set_gain(1.0);
    }

    fn output_level(&self) -> f32 {
        f32::from_bits(self.state.level_bits.load(Ordering::Acquire))
    }

    fn suspend(&self) -> Result<()> {
        self.commands
            .send(StreamCommand::Suspend)
            .map_err(|_| Error::AudioOutput("Output thread is gone".to_string()))
    }

    fn resume(&self) -> Result<()> {
        self.commands
            .send(StreamCommand::Resume)
            .map_err(|_| Error::AudioOutput("Output thread is gone".to_string()))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Body of the dedicated stream thread: build the stream, then serve
/// suspend/resume commands until shutdown.
fn stream_thread(
    device_name: Option<String>,
    sample_rate: u32,
    state: Arc<PlayoutState>,
    commands: mpsc::Receiver<StreamCommand>,
    ready: mpsc::Sender<std::result::Result<(), Error>>,
) {
    let stream = match build_stream(device_name, sample_rate, state) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::AudioOutput(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Suspend => {
                if let Err(e) = stream.pause() {
                    error!("Failed to pause output stream: {}", e);
                }
            }
            StreamCommand::Resume => {
                if let Err(e) = stream.play() {
                    error!("Failed to resume output stream: {}", e);
                }
            }
            StreamCommand::Shutdown => break,
        }
    }

    debug!("Output stream thread exiting");
}

fn build_stream(
    device_name: Option<String>,
    sample_rate: u32,
    state: Arc<PlayoutState>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = match device_name.as_ref() {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                Some(device) => device,
                None => {
                    warn!("Requested device '{}' not found, falling back to default", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::AudioOutput(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device".to_string()))?,
    };

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device config: {}", e)))?;
    let sample_format = supported.sample_format();

    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match sample_format {
        cpal::SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, state),
        cpal::SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, state),
        cpal::SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, state),
        other => Err(Error::AudioOutput(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: Arc<PlayoutState>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mix = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mix.resize(frames, 0.0f32);
                state.render(&mut mix);

                for (frame_idx, frame) in data.chunks_mut(channels).enumerate() {
                    let value = mix[frame_idx].clamp(-1.0, 1.0);
                    for slot in frame.iter_mut() {
                        *slot = T::from_sample(value);
                    }
                }
            },
            move |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

    Ok(stream)
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_buffer(start_frame: u64, frames: usize) -> (Arc<PlayoutState>, BufferId) {
        let state = Arc::new(PlayoutState::new(1000));
        let id = state.next_id.fetch_add(1, Ordering::Relaxed);
        state.playing.lock().unwrap().push(ActiveBuffer {
            id,
            start_frame,
            cursor: 0,
            samples: Arc::new(vec![0.5f32; frames]),
            channels: 1,
        });
        (state, id)
    }

    #[test]
    fn test_render_waits_for_start_frame() {
        let (state, _id) = state_with_buffer(8, 4);

        let mut mix = vec![0.0f32; 8];
        state.render(&mut mix);

        // Nothing scheduled in the first 8 frames
        assert!(mix.iter().all(|s| *s == 0.0));

        state.render(&mut mix);
        // Buffer begins at frame 8
        assert_eq!(mix[0], 0.5);
    }

    #[test]
    fn test_render_reports_completion() {
        let (state, id) = state_with_buffer(0, 4);

        let mut mix = vec![0.0f32; 8];
        state.render(&mut mix);

        assert!(state.playing.lock().unwrap().is_empty());
        let mut rx = state.completed_rx.lock().unwrap();
        assert_eq!(rx.try_pop(), Some(id));
    }

    #[test]
    fn test_ramp_value_interpolates() {
        let ramp = GainRamp {
            from: 1.0,
            to: 0.0,
            start_frame: 0,
            duration_frames: 10,
        };

        assert_eq!(ramp.value_at(0), 1.0);
        assert!((ramp.value_at(5) - 0.5).abs() < 1e-6);
        assert_eq!(ramp.value_at(10), 0.0);
        // Clamped past the end
        assert_eq!(ramp.value_at(100), 0.0);
        assert!(ramp.finished_at(10));
        assert!(!ramp.finished_at(9));
    }

    #[test]
    fn test_render_applies_and_retires_ramp() {
        let (state, _id) = state_with_buffer(0, 20);
        *state.ramp.lock().unwrap() = Some(GainRamp {
            from: 1.0,
            to: 0.0,
            start_frame: 0,
            duration_frames: 10,
        });

        let mut mix = vec![0.0f32; 10];
        state.render(&mut mix);

        // Buffer samples are 0.5; gain falls linearly from 1.0
        assert!((mix[0] - 0.5).abs() < 1e-6);
        assert!(mix[9] < mix[0]);

        // Ramp retired at the end of the period, gain pinned at target
        assert!(state.ramp.lock().unwrap().is_none());
        assert_eq!(state.gain(), 0.0);
    }

    #[test]
    fn test_zero_duration_ramp_applies_immediately() {
        let ramp = GainRamp {
            from: 0.0,
            to: 1.0,
            start_frame: 0,
            duration_frames: 0,
        };

        assert_eq!(ramp.value_at(0), 1.0);
        assert!(ramp.finished_at(0));
    }

    #[test]
    fn test_level_tracks_peak() {
        let (state, _id) = state_with_buffer(0, 4);
        let mut mix = vec![0.0f32; 4];
        state.render(&mut mix);

        let level = f32::from_bits(state.level_bits.load(Ordering::Acquire));
        assert!((level - 0.5).abs() < 1e-6);
    }
}
