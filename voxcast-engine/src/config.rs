//! Engine configuration
//!
//! Loaded from an optional TOML file merged over defaults. Every section has
//! sensible defaults so a missing file or a partial file both work; the
//! port/config-path come from command-line arguments with env fallbacks (see
//! `main.rs`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use voxcast_common::events::InterruptMode;

use crate::error::{Error, Result};
use crate::focus::FocusConfig;
use crate::session::SchedulerConfig;
use crate::synthesis::SynthesisConfig;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP control surface port
    pub port: u16,
    /// How podcast playback is interrupted when a call starts
    pub interrupt_mode: InterruptMode,
    pub focus: FocusSettings,
    pub scheduler: SchedulerSettings,
    pub synthesis: SynthesisSettings,
    pub telemetry: TelemetrySettings,
    pub audio: AudioSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 5750,
            interrupt_mode: InterruptMode::Pause,
            focus: FocusSettings::default(),
            scheduler: SchedulerSettings::default(),
            synthesis: SynthesisSettings::default(),
            telemetry: TelemetrySettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

/// Fade timings for focus hand-offs, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    pub pause_fade_ms: u64,
    pub duck_fade_ms: u64,
    pub resume_fade_ms: u64,
    pub duck_level: f32,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            pause_fade_ms: 300,
            duck_fade_ms: 500,
            resume_fade_ms: 500,
            duck_level: 0.15,
        }
    }
}

/// Scheduler timing parameters, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub safety_margin_ms: u64,
    pub restart_epsilon_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            safety_margin_ms: 20,
            restart_epsilon_ms: 10,
        }
    }
}

/// Synthesis retry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 1000,
        }
    }
}

/// Telemetry ring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub capacity: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { capacity: 500 }
    }
}

/// Audio device parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Playout sample rate in Hz (the model's output rate)
    pub output_sample_rate: u32,
    /// Microphone sample rate in Hz (the model's input rate)
    pub capture_sample_rate: u32,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
    /// Input device name (None = system default)
    pub input_device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_sample_rate: 24000,
            capture_sample_rate: 16000,
            output_device: None,
            input_device: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, or defaults when `path` is None.
    ///
    /// An explicitly given path that cannot be read or parsed is an error;
    /// silence there would hide a typo'd path behind defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&raw)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
            }
        }
    }

    pub fn focus_config(&self) -> FocusConfig {
        FocusConfig {
            pause_fade: Duration::from_millis(self.focus.pause_fade_ms),
            duck_fade: Duration::from_millis(self.focus.duck_fade_ms),
            resume_fade: Duration::from_millis(self.focus.resume_fade_ms),
            duck_level: self.focus.duck_level,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            safety_margin: Duration::from_millis(self.scheduler.safety_margin_ms),
            restart_epsilon: Duration::from_millis(self.scheduler.restart_epsilon_ms),
        }
    }

    pub fn synthesis_config(&self) -> SynthesisConfig {
        SynthesisConfig {
            max_retries: self.synthesis.max_retries,
            base_delay: Duration::from_millis(self.synthesis.base_delay_ms),
        }
    }
}

// ========================================
// Tests
// ========================================
