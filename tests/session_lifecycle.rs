use std::time::Duration;
use voicestream::{
    CaptureSession, ChannelEvents, CollectorEvents, ErrorKind, ManualClock, MockAudioSource,
    MockFrame, SessionConfig, SessionEvent, SessionState,
};

fn quiet_config() -> SessionConfig {
    SessionConfig {
        route_to_output_sink: false,
        ..SessionConfig::default()
    }
}

fn tone(len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
        .collect()
}

#[test]
fn test_full_lifecycle_with_scripted_frames() {
    let source = MockAudioSource::new().with_frames(vec![
        MockFrame::Samples(tone(4410, 0.5)),
        MockFrame::Failure("overrun".to_string()),
        MockFrame::Samples(tone(4410, 0.5)),
    ]);
    let stats = source.stats();
    let events = CollectorEvents::new();
    let mut session = CaptureSession::new(source, quiet_config(), events.clone()).unwrap();

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.pump(), 3);

    session.stop();
    assert_eq!(session.state(), SessionState::Idle);

    assert_eq!(events.labels(), vec!["start", "chunk", "error", "chunk", "stop"]);
    assert_eq!(
        events.errors(),
        vec![(
            ErrorKind::Processing,
            "Frame processing failed: overrun".to_string()
        )]
    );
    assert_eq!(stats.acquired(), 1);
    assert_eq!(stats.released(), 1);

    let session_stats = session.stats();
    assert_eq!(session_stats.frames_processed, 2);
    assert_eq!(session_stats.frames_failed, 1);
}

#[test]
fn test_chunk_sequences_follow_frames() {
    let source = MockAudioSource::new().with_frames(vec![
        MockFrame::Samples(tone(441, 0.2)),
        MockFrame::Samples(tone(441, 0.2)),
        MockFrame::Samples(tone(441, 0.2)),
    ]);
    let events = CollectorEvents::new();
    let mut session = CaptureSession::new(source, quiet_config(), events.clone()).unwrap();

    session.start().unwrap();
    session.pump();
    session.stop();

    let sequences: Vec<u64> = events.chunks().iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn test_acquisition_failure_then_no_events_after() {
    let source = MockAudioSource::new().with_acquire_failure("no microphone");
    let events = CollectorEvents::new();
    let mut session = CaptureSession::new(source, quiet_config(), events.clone()).unwrap();

    let err = session.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Acquisition);
    assert_eq!(session.state(), SessionState::Idle);

    // Stopping an idle session is a no-op
    session.stop();
    assert_eq!(events.labels(), vec!["error"]);
}

#[test]
fn test_auto_stop_with_manual_clock() {
    let clock = ManualClock::new();
    let config = SessionConfig {
        enable_silence_detection: true,
        auto_stop_on_silence: true,
        silence_duration_ms: 500,
        ..quiet_config()
    };
    let source = MockAudioSource::new();
    let injector = source.injector();
    let stats = source.stats();
    let events = CollectorEvents::new();
    let mut session =
        CaptureSession::with_clock(source, config, events.clone(), clock.clone()).unwrap();

    session.start().unwrap();

    injector.push(vec![0.0; 441]);
    session.pump();
    assert!(session.is_active());

    clock.advance(Duration::from_millis(300));
    injector.push(vec![0.0; 441]);
    session.pump();
    assert!(session.is_active());

    clock.advance(Duration::from_millis(300));
    injector.push(vec![0.0; 441]);
    session.pump();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(
        events.labels(),
        vec!["start", "chunk", "chunk", "silence", "chunk", "stop"]
    );
    assert_eq!(stats.released(), 1);
}

#[test]
fn test_channel_events_cross_thread() {
    let (events, rx) = ChannelEvents::bounded(16);
    let source = MockAudioSource::new();
    let injector = source.injector();

    let consumer = std::thread::spawn(move || {
        let mut labels = Vec::new();
        while let Ok(event) = rx.recv() {
            let done = matches!(event, SessionEvent::Stopped);
            labels.push(event.label());
            if done {
                break;
            }
        }
        labels
    });

    let mut session = CaptureSession::new(source, quiet_config(), events).unwrap();
    session.start().unwrap();
    assert!(injector.push(tone(1024, 0.3)));
    assert_eq!(session.pump_timeout(Duration::from_secs(1)), 1);
    session.stop();

    let labels = consumer.join().unwrap();
    assert_eq!(labels, vec!["start", "chunk", "stop"]);
}

#[test]
fn test_restart_acquires_fresh_resources() {
    let source = MockAudioSource::new().with_output();
    let stats = source.stats();
    let injector = source.injector();
    let events = CollectorEvents::new();
    let config = SessionConfig {
        route_to_output_sink: true,
        ..SessionConfig::default()
    };
    let mut session = CaptureSession::new(source, config, events.clone()).unwrap();

    for _ in 0..3 {
        session.start().unwrap();
        injector.push(tone(441, 0.4));
        session.pump();
        session.stop();
    }

    assert_eq!(stats.acquired(), 3);
    assert_eq!(stats.released(), 3);
    assert_eq!(stats.outputs_opened(), 3);
    assert_eq!(stats.outputs_closed(), 3);
    assert_eq!(events.count("start"), 3);
    assert_eq!(events.count("stop"), 3);
    assert_eq!(events.count("chunk"), 3);
}

#[test]
fn test_injection_after_stop_is_ignored() {
    let source = MockAudioSource::new();
    let injector = source.injector();
    let events = CollectorEvents::new();
    let mut session = CaptureSession::new(source, quiet_config(), events.clone()).unwrap();

    session.start().unwrap();
    session.stop();

    assert!(!injector.push(tone(441, 0.4)));
    assert_eq!(session.pump(), 0);
    assert_eq!(events.count("chunk"), 0);
}
