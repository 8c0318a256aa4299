//! Core audio data types
//!
//! Two representations move through the engine:
//! - [`AudioData`]: raw PCM16 little-endian bytes as they cross the transport
//!   and synthesis seams
//! - [`AudioBuffer`]: decoded f32 samples ready for the output device
//!
//! Codec work beyond PCM16 ↔ f32 is out of scope; fragments arrive already
//! in linear PCM.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Raw PCM16 audio bytes plus the format needed to interpret them.
///
/// This is the wire shape: transport fragments and synthesis results are
/// `AudioData`, and capture frames are encoded into it before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    /// PCM16 little-endian bytes, interleaved if multi-channel
    pub data: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 for all voice paths)
    pub channels: u16,
}

impl AudioData {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// True when the payload carries no samples
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of per-channel frames in the payload
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        (self.data.len() / 2) / self.channels as usize
    }

    /// Playback duration of the payload
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Concatenate fragments in order into one continuous asset.
    ///
    /// The format of the first fragment wins; later fragments are assumed to
    /// share it (the synthesis backend contract guarantees a single format
    /// per job).
    pub fn concat(parts: &[AudioData]) -> Option<AudioData> {
        let first = parts.first()?;
        let total: usize = parts.iter().map(|p| p.data.len()).sum();

        let mut data = Vec::with_capacity(total);
        for part in parts {
            data.extend_from_slice(&part.data);
        }

        Some(AudioData {
            data,
            sample_rate: first.sample_rate,
            channels: first.channels,
        })
    }
}

/// Decoded audio ready for scheduling on the output device.
///
/// Samples are f32 in -1.0..1.0, interleaved if multi-channel. The sample
/// vector is shared so a buffer can sit in the scheduler's active set and the
/// device's playout list without copying.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            channels,
        }
    }

    /// Number of per-channel frames
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration of the buffer
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

/// Decode a PCM16 fragment into a playable f32 buffer.
///
/// # Errors
/// Fails when the byte length is odd (not whole 16-bit samples) or does not
/// divide evenly across channels.
pub fn decode_pcm16(fragment: &AudioData) -> Result<AudioBuffer> {
    if fragment.data.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload length {} is not a whole number of samples",
            fragment.data.len()
        )));
    }

    let sample_count = fragment.data.len() / 2;
    if fragment.channels == 0 || sample_count % fragment.channels as usize != 0 {
        return Err(Error::Decode(format!(
            "{} samples do not divide evenly across {} channels",
            sample_count, fragment.channels
        )));
    }

    let mut samples = Vec::with_capacity(sample_count);
    for chunk in fragment.data.chunks_exact(2) {
        let value = i16::from_le_bytes([chunk[0], chunk[1]]);
        samples.push(value as f32 / i16::MAX as f32);
    }

    Ok(AudioBuffer::new(
        samples,
        fragment.sample_rate,
        fragment.channels,
    ))
}

/// Encode f32 samples into PCM16 little-endian bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

// ========================================
// Tests
// ========================================
