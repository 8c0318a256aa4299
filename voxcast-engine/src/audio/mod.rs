//! Audio subsystem: data types and device adapters

pub mod capture;
pub mod output;
pub mod types;

pub use capture::{CaptureDevice, CaptureFrame, CpalCapture};
pub use output::{BufferId, CpalOutput, OutputDevice};
pub use types::{decode_pcm16, encode_pcm16, AudioBuffer, AudioData};
