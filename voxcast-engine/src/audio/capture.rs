//! Audio capture device seam and cpal adapter
//!
//! The call session pulls microphone frames through the [`CaptureDevice`]
//! trait. [`CpalCapture`] is the production adapter; it keeps the cpal input
//! stream on its own thread and hands frames to the async side through a
//! bounded channel. A slow consumer drops frames rather than stalling the
//! capture callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Channel capacity for captured frames. At ~10-20 ms per frame this is a
/// couple of seconds of headroom before frames get dropped.
const FRAME_CHANNEL_CAPACITY: usize = 128;

/// One block of captured mono samples (f32, -1.0 to 1.0)
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub samples: Vec<f32>,
}

/// Microphone capture seam.
///
/// `start` acquires the device and returns the frame stream; `stop` releases
/// it. Both are safe to call repeatedly.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the device and begin producing frames
    fn start(&self) -> Result<mpsc::Receiver<CaptureFrame>>;

    /// Release the device; pending frames in the channel are discarded by the
    /// receiver going away
    fn stop(&self);

    /// Native sample rate of produced frames in Hz
    fn sample_rate(&self) -> u32;
}

/// Production capture adapter backed by cpal.
pub struct CpalCapture {
    device_name: Option<String>,
    sample_rate: u32,
    shutdown: Mutex<Option<std_mpsc::Sender<()>>>,
    dropped_frames: Arc<AtomicU64>,
}

impl CpalCapture {
    /// Create an adapter for the named device (None = default input device).
    pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
        Self {
            device_name,
            sample_rate,
            shutdown: Mutex::new(None),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total frames dropped because the consumer fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&self) -> Result<mpsc::Receiver<CaptureFrame>> {
        // Restarting implies releasing any previous stream first
        self.stop();

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        let dropped = Arc::clone(&self.dropped_frames);

        std::thread::Builder::new()
            .name("voxcast-capture".to_string())
            .spawn(move || {
                capture_thread(device_name, sample_rate, frame_tx, dropped, shutdown_rx, ready_tx);
            })
            .map_err(|e| Error::Capture(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio capture started at {} Hz", self.sample_rate);
                *self.shutdown.lock().unwrap() = Some(shutdown_tx);
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Capture(
                "Capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().unwrap().take() {
            // Thread exits when it receives the signal or the sender drops
            let _ = shutdown.send(());
            debug!("Capture stream released");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    device_name: Option<String>,
    sample_rate: u32,
    frames: mpsc::Sender<CaptureFrame>,
    dropped: Arc<AtomicU64>,
    shutdown: std_mpsc::Receiver<()>,
    ready: std_mpsc::Sender<std::result::Result<(), Error>>,
) {
    let host = cpal::default_host();

    let device = match device_name.as_ref() {
        Some(name) => {
            let found = host
                .input_devices()
                .ok()
                .and_then(|mut devices| devices.find(|d| d.name().ok().as_ref() == Some(name)));
            match found {
                Some(device) => device,
                None => {
                    warn!("Requested input device '{}' not found, using default", name);
                    match host.default_input_device() {
                        Some(device) => device,
                        None => {
                            let _ = ready.send(Err(Error::Capture(format!(
                                "Input device '{}' not found and no default available",
                                name
                            ))));
                            return;
                        }
                    }
                }
            }
        }
        None => match host.default_input_device() {
            Some(device) => device,
            None => {
                let _ = ready.send(Err(Error::Capture(
                    "No default input device".to_string(),
                )));
                return;
            }
        },
    };

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let frame = CaptureFrame {
                samples: data.to_vec(),
            };
            if frames.try_send(frame).is_err() {
                // Consumer fell behind; drop rather than block the callback
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |err| {
            error!("Audio capture stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::Capture(format!(
                "Failed to build input stream: {}",
                e
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::Capture(format!(
            "Failed to start input stream: {}",
            e
        ))));
        return;
    }
    let _ = ready.send(Ok(()));

    // Hold the stream alive until stop() or the adapter drops
    let _ = shutdown.recv();
    drop(stream);
    debug!("Capture stream thread exiting");
}
