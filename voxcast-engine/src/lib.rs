//! # Voxcast Engine Library
//!
//! Audio core for a podcast app with a live, interruptible voice call:
//!
//! - **Focus arbiter**: exclusive/ducking ownership of the shared speaker
//!   between background playback and the live session
//! - **Call session + stream scheduler**: gap-free commit-queue playback of
//!   inbound audio fragments, instant barge-in cutoff, and the muted/unmuted
//!   capture path
//! - **Synthesis pipeline**: sequential, retrying batch assembly of a long
//!   multi-turn spoken script
//!
//! External collaborators (output/capture devices, the live transport, the
//! synthesis backend) are trait seams; cpal-backed production adapters live
//! in [`audio`].

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod focus;
pub mod session;
pub mod state;
pub mod synthesis;

pub use error::{Error, Result};
pub use state::SharedState;
