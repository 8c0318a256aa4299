//! Resilient chunked synthesis pipeline
//!
//! Turns a long multi-turn script into one continuous audio asset despite a
//! synthesis backend that may fail per request.
//!
//! Chunks are one dialogue turn each - small enough to bound the blast radius
//! of a failure and to stay inside the backend's reliable request size.
//! Chunks are processed strictly sequentially: concurrent requests trip
//! backend rate/size limits and produce silently dropped output, which is
//! worse than added latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use voxcast_common::events::{EngineEvent, EventBus};
use voxcast_common::telemetry::{TelemetryLevel, TelemetryRecorder};

use crate::audio::AudioData;
use crate::error::Result;

/// One unit of text handed to the synthesis backend: a single dialogue turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptChunk {
    /// Speaker name, used to pick a voice from the voice map
    pub speaker: String,
    /// The turn's text
    pub text: String,
}

/// Speaker name → backend voice id
pub type VoiceMap = HashMap<String, String>;

/// Synthesis backend seam: one text chunk plus the voice mapping in, one
/// audio fragment out. An `Ok` response with an empty payload is treated by
/// the pipeline exactly like an error.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, chunk: &ScriptChunk, voices: &VoiceMap) -> Result<AudioData>;
}

/// Retry parameters for the pipeline
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Retries per chunk after the initial attempt
    pub max_retries: u32,
    /// First backoff delay; doubles on each further retry
    pub base_delay: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a synthesis job that produced at least one fragment.
#[derive(Debug, Clone)]
pub struct SynthesizedEpisode {
    /// All surviving fragments concatenated in original order
    pub audio: AudioData,
    /// Number of chunks that synthesized successfully
    pub completed: usize,
    /// Indices of chunks that exhausted their retries and left a hole
    pub dropped: Vec<usize>,
}

/// Sequential, retrying batch job over a chunked script.
pub struct SynthesisPipeline {
    backend: Arc<dyn SpeechBackend>,
    config: SynthesisConfig,
    telemetry: Arc<TelemetryRecorder>,
    events: EventBus,
}

impl SynthesisPipeline {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        config: SynthesisConfig,
        telemetry: Arc<TelemetryRecorder>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            config,
            telemetry,
            events,
        }
    }

    /// Run the whole job.
    ///
    /// Reports fractional progress (`completed / total`) through
    /// `on_progress` after every chunk, successful or not. Returns `None`
    /// only when every chunk failed; a partially failed job still returns an
    /// episode with its gaps listed in `dropped`.
    pub async fn synthesize(
        &self,
        chunks: &[ScriptChunk],
        voices: &VoiceMap,
        mut on_progress: impl FnMut(f32),
    ) -> Option<SynthesizedEpisode> {
        if chunks.is_empty() {
            self.telemetry
                .warn("synthesis", "empty script, nothing to synthesize");
            return None;
        }

        let total = chunks.len();
        let mut fragments: Vec<Option<AudioData>> = Vec::with_capacity(total);

        for (index, chunk) in chunks.iter().enumerate() {
            let fragment = self.synthesize_chunk(index, chunk, voices).await;
            fragments.push(fragment);

            let completed = index + 1;
            let fraction = completed as f32 / total as f32;
            on_progress(fraction);
            self.events.emit_lossy(EngineEvent::SynthesisProgress {
                completed,
                total,
                fraction,
                timestamp: chrono::Utc::now(),
            });
        }

        let dropped: Vec<usize> = fragments
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.is_none().then_some(i))
            .collect();
        let survivors: Vec<AudioData> = fragments.into_iter().flatten().collect();

        if survivors.is_empty() {
            self.telemetry.record(
                TelemetryLevel::Error,
                "synthesis",
                format!("all {} chunks failed, no episode produced", total),
                None,
            );
            self.events.emit_lossy(EngineEvent::SynthesisFailed {
                total,
                timestamp: chrono::Utc::now(),
            });
            return None;
        }

        let completed = survivors.len();
        let audio = AudioData::concat(&survivors)?;

        if !dropped.is_empty() {
            self.telemetry.record(
                TelemetryLevel::Warn,
                "synthesis",
                format!("episode has {} hole(s) at chunk(s) {:?}", dropped.len(), dropped),
                None,
            );
        }

        self.events.emit_lossy(EngineEvent::SynthesisCompleted {
            succeeded: completed,
            dropped: dropped.len(),
            duration_ms: audio.duration().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });

        Some(SynthesizedEpisode {
            audio,
            completed,
            dropped,
        })
    }

    /// One chunk with retry/backoff. Returns `None` after exhausting all
    /// retries - the hole is logged, never thrown.
    async fn synthesize_chunk(
        &self,
        index: usize,
        chunk: &ScriptChunk,
        voices: &VoiceMap,
    ) -> Option<AudioData> {
        for attempt in 0..=self.config.max_retries {
            match self.backend.synthesize(chunk, voices).await {
                Ok(fragment) if !fragment.is_empty() => return Some(fragment),
                Ok(_) => {
                    warn!(
                        "chunk {} attempt {}: response carried no audio payload",
                        index, attempt
                    );
                }
                Err(e) => {
                    warn!("chunk {} attempt {} failed: {}", index, attempt, e);
                }
            }

            if attempt < self.config.max_retries {
                let delay = self.config.base_delay * 2u32.pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        self.telemetry.record(
            TelemetryLevel::Error,
            "synthesis",
            format!(
                "chunk {} dropped after {} attempts",
                index,
                self.config.max_retries + 1
            ),
            Some(serde_json::json!({ "speaker": chunk.speaker })),
        );
        None
    }
}

/// Partition a script into minimal one-turn chunks.
///
/// Accepts the common `Speaker: line` screenplay form; a line without a
/// speaker prefix continues the previous turn. Blank lines are skipped.
pub fn split_script(script: &str) -> Vec<ScriptChunk> {
    let mut chunks: Vec<ScriptChunk> = Vec::new();

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(':') {
            Some((speaker, text)) if !speaker.trim().is_empty() && !speaker.contains(' ') => {
                chunks.push(ScriptChunk {
                    speaker: speaker.trim().to_string(),
                    text: text.trim().to_string(),
                });
            }
            _ => {
                if let Some(last) = chunks.last_mut() {
                    last.text.push(' ');
                    last.text.push_str(line);
                } else {
                    chunks.push(ScriptChunk {
                        speaker: String::new(),
                        text: line.to_string(),
                    });
                }
            }
        }
    }

    chunks
}

// ========================================
// Tests
// ========================================
