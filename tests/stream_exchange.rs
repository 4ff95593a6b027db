mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use chatterbass::stream::client::{StreamClient, StreamConfig, StreamEvent};
use chatterbass::types::{AudioFrame, ControlEvent};
use chatterbass::{ErrorKind, Metrics};

use common::{
    assistant_turn_start, audio_output, garbled_audio_output, transcript_end, turn_end,
    LoopbackConnector,
};

fn stream_cfg() -> StreamConfig {
    StreamConfig {
        voice_id: "matthew".to_string(),
        system_prompt: "test prompt".to_string(),
        capture_rate: 16_000,
        playback_rate: 24_000,
        send_queue: 8,
        reconnect_attempts: 1,
        reconnect_backoff: Duration::from_millis(10),
        reorder_window: 4,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

#[tokio::test]
async fn open_sends_the_preamble_in_order() {
    let connector = Arc::new(LoopbackConnector::new(vec![Vec::new()]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());

    let client = StreamClient::open(stream_cfg(), connector.clone(), tx, metrics)
        .await
        .expect("open should succeed");

    let sent = connector.sent();
    assert_eq!(sent.len(), 6, "preamble is six events");
    assert!(sent[0].contains("sessionStart"));
    assert!(sent[1].contains("promptStart"));
    assert!(sent[2].contains("contentStart"));
    assert!(sent[3].contains("textInput"));
    assert!(sent[5].contains("audioInputConfiguration"));

    match next_event(&mut rx).await {
        StreamEvent::Control(ControlEvent::SessionStarted) => {}
        other => panic!("expected SessionStarted, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn out_of_order_audio_is_released_in_sequence() {
    let script = vec![
        assistant_turn_start(),
        audio_output(0, &[1, 2]),
        audio_output(2, &[5, 6]),
        audio_output(1, &[3, 4]),
        turn_end(),
    ];
    let connector = Arc::new(LoopbackConnector::new(vec![script]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let client = StreamClient::open(stream_cfg(), connector, tx, metrics)
        .await
        .expect("open should succeed");

    let mut audio_seqs = Vec::new();
    loop {
        match next_event(&mut rx).await {
            StreamEvent::Audio(frame) => audio_seqs.push(frame.seq),
            StreamEvent::Control(ControlEvent::TurnEnded) => break,
            StreamEvent::Control(_) => {}
        }
    }
    assert_eq!(audio_seqs, vec![0, 1, 2], "playback must be in order");
    client.close().await;
}

#[tokio::test]
async fn transcript_content_end_does_not_cut_the_turn() {
    // A transcript block closes between audio chunks; the spoken turn
    // keeps going until the explicit END_TURN.
    let script = vec![
        assistant_turn_start(),
        audio_output(0, &[1, 2]),
        transcript_end(),
        audio_output(1, &[3, 4]),
        turn_end(),
    ];
    let connector = Arc::new(LoopbackConnector::new(vec![script]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let client = StreamClient::open(stream_cfg(), connector, tx, metrics)
        .await
        .expect("open should succeed");

    let mut audio_seqs = Vec::new();
    loop {
        match next_event(&mut rx).await {
            StreamEvent::Audio(frame) => audio_seqs.push(frame.seq),
            StreamEvent::Control(ControlEvent::TurnEnded) => break,
            StreamEvent::Control(_) => {}
        }
    }
    assert_eq!(
        audio_seqs,
        vec![0, 1],
        "audio after the transcript close belongs to the same turn"
    );
    client.close().await;
}

#[tokio::test]
async fn garbled_audio_is_counted_and_skipped() {
    let script = vec![
        assistant_turn_start(),
        garbled_audio_output(1),
        audio_output(0, &[1, 2]),
        turn_end(),
    ];
    let connector = Arc::new(LoopbackConnector::new(vec![script]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let client = StreamClient::open(stream_cfg(), connector, tx, metrics.clone())
        .await
        .expect("open should succeed");

    let mut audio_seqs = Vec::new();
    loop {
        match next_event(&mut rx).await {
            StreamEvent::Audio(frame) => audio_seqs.push(frame.seq),
            StreamEvent::Control(ControlEvent::TurnEnded) => break,
            StreamEvent::Control(ControlEvent::Error(kind, msg)) => {
                panic!("bad payload must not surface to the machine: {kind:?} {msg}")
            }
            StreamEvent::Control(_) => {}
        }
    }
    assert_eq!(audio_seqs, vec![0], "the well-formed frame still plays");
    assert_eq!(
        metrics.snapshot().protocol_skips,
        1,
        "the garbled payload is counted"
    );
    client.close().await;
}

#[tokio::test]
async fn close_sends_the_closing_choreography() {
    let connector = Arc::new(LoopbackConnector::new(vec![Vec::new()]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let client = StreamClient::open(stream_cfg(), connector.clone(), tx, metrics)
        .await
        .expect("open should succeed");

    client.close().await;

    let sent = connector.sent();
    let n = sent.len();
    assert!(sent[n - 3].contains("contentEnd"));
    assert!(sent[n - 2].contains("promptEnd"));
    assert!(sent[n - 1].contains("sessionEnd"));

    let mut saw_ended = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        if matches!(event, StreamEvent::Control(ControlEvent::SessionEnded)) {
            saw_ended = true;
        }
    }
    assert!(saw_ended, "graceful close must surface SessionEnded");
}

#[tokio::test]
async fn overflow_drops_oldest_capture_frames() {
    // Sink stalls after the preamble; the exchange backs up into the
    // bounded capture queue.
    let connector = Arc::new(LoopbackConnector::new(vec![Vec::new()]).with_blocked_sink(6));
    let (tx, _rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let mut cfg = stream_cfg();
    cfg.send_queue = 2;
    let client = StreamClient::open(cfg, connector, tx, metrics.clone())
        .await
        .expect("open should succeed");

    for seq in 0..10 {
        client.send_audio(AudioFrame::new(vec![0i16; 160], 16_000, seq)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = metrics.snapshot();
    assert!(
        snapshot.frames_dropped >= 5,
        "expected oldest-frame drops under backpressure, got {}",
        snapshot.frames_dropped
    );
}

#[tokio::test]
async fn reconnects_once_then_surfaces_the_loss() {
    // Two short-lived connections, then the endpoint is gone for good.
    let connector = Arc::new(LoopbackConnector::flaky(vec![Vec::new(), Vec::new()]));
    let (tx, mut rx) = mpsc::channel(32);
    let metrics = Arc::new(Metrics::default());
    let _client = StreamClient::open(stream_cfg(), connector.clone(), tx, metrics)
        .await
        .expect("open should succeed");

    let mut saw_failure = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(1), rx.recv()).await {
        if let StreamEvent::Control(ControlEvent::Error(ErrorKind::ConnectionFailed, _)) = event {
            saw_failure = true;
            break;
        }
    }
    assert!(saw_failure, "exhausted reconnect must surface a failure");
    assert_eq!(connector.connects(), 2, "exactly one reconnect attempt");

    // Both connections got the full opening choreography.
    let preambles = connector
        .sent()
        .iter()
        .filter(|m| m.contains("sessionStart"))
        .count();
    assert_eq!(preambles, 2);
}
