//! Call session integration tests
//!
//! Drive a full CallSession against scripted transport/capture/output doubles
//! and assert the lifecycle, the output path, barge-in and the mute gate.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{fragment_100ms, wait_for, ManualOutput, MockCapture, ScriptedTransport};

use voxcast_common::events::{ConnectionStatus, EventBus, SpeakerRole};
use voxcast_common::telemetry::TelemetryRecorder;
use voxcast_engine::session::{
    CallSession, SchedulerConfig, StreamScheduler, TransportEvent,
};
use voxcast_engine::SharedState;

struct Fixture {
    session: Arc<CallSession>,
    output: Arc<ManualOutput>,
    capture: Arc<MockCapture>,
    transport: Arc<ScriptedTransport>,
    state: Arc<SharedState>,
}

fn fixture() -> Fixture {
    let telemetry = Arc::new(TelemetryRecorder::new(200));
    let state = Arc::new(SharedState::new(EventBus::new(64)));
    let output = ManualOutput::new();
    let capture = MockCapture::new(16000);
    let transport = ScriptedTransport::new();

    let scheduler = Arc::new(StreamScheduler::new(
        output.clone(),
        SchedulerConfig::default(),
        Arc::clone(&telemetry),
    ));

    let session = Arc::new(CallSession::new(
        scheduler,
        transport.clone(),
        capture.clone(),
        output.clone(),
        Arc::clone(&state),
        telemetry,
    ));

    Fixture {
        session,
        output,
        capture,
        transport,
        state,
    }
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let f = fixture();

    f.session.connect().await.unwrap();

    assert_eq!(
        f.state.connection_status().await,
        ConnectionStatus::Connected
    );
    assert!(f.capture.is_running());
}

#[tokio::test]
async fn test_inbound_audio_is_scheduled_in_order() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;

    assert!(
        wait_for(|| f.output.schedule_calls().len() == 3, Duration::from_secs(1)).await,
        "fragments were not committed"
    );

    let calls = f.output.schedule_calls();
    for pair in calls.windows(2) {
        let (_, prev_start, prev_dur) = pair[0];
        let (_, next_start, _) = pair[1];
        assert!(next_start >= prev_start + prev_dur);
    }

    // Model audio flips the voice-activity flag
    assert!(f.state.is_speaking().await);
}

#[tokio::test]
async fn test_turn_complete_resets_speaking() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    f.transport.push(TransportEvent::TurnComplete).await;

    let mut cleared = false;
    for _ in 0..100 {
        if !f.state.is_speaking().await {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared, "speaking flag was not reset by turn completion");
}

#[tokio::test]
async fn test_barge_in_cuts_active_buffers() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    assert!(wait_for(|| f.output.schedule_calls().len() == 2, Duration::from_secs(1)).await);

    f.output.advance(Duration::from_millis(30));
    f.transport.push(TransportEvent::Interrupted).await;

    assert!(
        wait_for(|| f.output.stopped_ids().len() == 2, Duration::from_secs(1)).await,
        "interruption did not stop active buffers"
    );
    assert_eq!(f.session.scheduler().active_count(), 0);
    assert!(f
        .output
        .ramp_cancelled
        .load(std::sync::atomic::Ordering::SeqCst));

    let mut quiet = false;
    for _ in 0..100 {
        if !f.state.is_speaking().await {
            quiet = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(quiet, "speaking indicator survived the interruption");

    // The next fragment lands at or after the interruption instant
    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    assert!(wait_for(|| f.output.schedule_calls().len() == 3, Duration::from_secs(1)).await);
    let (_, start, _) = f.output.schedule_calls()[2];
    assert!(start >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_transcript_accumulates() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport
        .push(TransportEvent::Text {
            text: "hello?".to_string(),
            role: SpeakerRole::User,
        })
        .await;
    f.transport
        .push(TransportEvent::Text {
            text: "Hi! How can I help?".to_string(),
            role: SpeakerRole::Model,
        })
        .await;

    let mut complete = false;
    for _ in 0..100 {
        if f.state.transcript().await.len() == 2 {
            complete = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(complete, "transcript lines did not arrive");

    let transcript = f.state.transcript().await;
    assert_eq!(transcript[0].role, SpeakerRole::User);
    assert_eq!(transcript[1].role, SpeakerRole::Model);
}

#[tokio::test]
async fn test_capture_frames_flow_to_transport() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.capture.inject(vec![0.1f32; 320]).await;
    f.capture.inject(vec![0.2f32; 320]).await;

    assert!(
        wait_for(|| f.transport.sent_audio_count() == 2, Duration::from_secs(1)).await,
        "captured frames did not reach the transport"
    );

    let sent = f.transport.sent_audio.lock().unwrap();
    assert_eq!(sent[0].sample_rate, 16000);
    assert_eq!(sent[0].channels, 1);
    assert_eq!(sent[0].data.len(), 320 * 2);
}

#[tokio::test]
async fn test_mute_gate_drops_frames() {
    let f = fixture();
    f.session.connect().await.unwrap();

    assert!(f.session.toggle_mic());
    f.capture.inject(vec![0.1f32; 320]).await;
    f.capture.inject(vec![0.1f32; 320]).await;

    // Give the capture loop time to (not) forward them
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.transport.sent_audio_count(), 0);

    // Unmuted frames flow again; the muted ones were dropped, not buffered
    assert!(!f.session.toggle_mic());
    f.capture.inject(vec![0.3f32; 320]).await;
    assert!(wait_for(|| f.transport.sent_audio_count() == 1, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_send_failure_does_not_kill_capture_loop() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport
        .fail_send
        .store(true, std::sync::atomic::Ordering::SeqCst);
    f.capture.inject(vec![0.1f32; 320]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    f.transport
        .fail_send
        .store(false, std::sync::atomic::Ordering::SeqCst);
    f.capture.inject(vec![0.1f32; 320]).await;

    assert!(
        wait_for(|| f.transport.sent_audio_count() == 1, Duration::from_secs(1)).await,
        "capture loop died after a send failure"
    );
}

#[tokio::test]
async fn test_stale_events_after_epoch_bump_do_nothing() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    assert!(wait_for(|| f.output.schedule_calls().len() == 1, Duration::from_secs(1)).await);

    // A racing disconnect bumps the epoch while the receive loop is still
    // alive; everything it captured is now stale
    f.session.scheduler().invalidate();

    f.transport.push(TransportEvent::Audio(fragment_100ms())).await;
    f.transport.push(TransportEvent::Interrupted).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No mutation, no device call
    assert_eq!(f.output.schedule_calls().len(), 1);
    assert!(f.output.stopped_ids().is_empty());
    assert!(!f
        .output
        .ramp_cancelled
        .load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let f = fixture();

    // Safe before any connect
    f.session.disconnect().await;
    assert_eq!(
        f.state.connection_status().await,
        ConnectionStatus::Disconnected
    );

    f.session.connect().await.unwrap();
    f.session.disconnect().await;
    f.session.disconnect().await;

    assert_eq!(
        f.state.connection_status().await,
        ConnectionStatus::Disconnected
    );
    assert!(!f.capture.is_running());
}

#[tokio::test]
async fn test_capture_failure_surfaces_as_failed_state() {
    let f = fixture();
    f.capture
        .fail_start
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = f.session.connect().await;
    assert!(result.is_err());

    match f.state.connection_status().await {
        ConnectionStatus::Failed { message } => {
            assert!(message.contains("permission denied"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_open_failure_releases_capture() {
    let f = fixture();
    f.transport
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(f.session.connect().await.is_err());
    assert!(!f.capture.is_running());
    assert!(matches!(
        f.state.connection_status().await,
        ConnectionStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn test_transport_error_event_fails_session_once() {
    let f = fixture();
    f.session.connect().await.unwrap();

    f.transport
        .push(TransportEvent::Error("stream reset".to_string()))
        .await;

    let mut failed = false;
    for _ in 0..100 {
        if matches!(
            f.state.connection_status().await,
            ConnectionStatus::Failed { .. }
        ) {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(failed, "transport error was not surfaced as Failed state");
    assert!(!f.capture.is_running());
}

#[tokio::test]
async fn test_video_frame_requires_connection() {
    let f = fixture();

    let result = f.session.send_video_frame(vec![1, 2, 3], "image/jpeg").await;
    assert!(result.is_err());

    f.session.connect().await.unwrap();
    f.session
        .send_video_frame(vec![1, 2, 3], "image/jpeg")
        .await
        .unwrap();

    let images = f.transport.sent_images.lock().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].1, "image/jpeg");
}
