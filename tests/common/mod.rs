#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use chatterbass::error::CoreError;
use chatterbass::hw::MotorActuator;
use chatterbass::stream::{Connector, TransportSink, TransportSource};
use chatterbass::types::{AudioFrame, MotorRole};

/// In-process transport double. Each `connect` hands out the next script
/// of inbound JSON events; everything the client sends lands in `sent`.
pub struct LoopbackConnector {
    scripts: Mutex<VecDeque<Vec<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
    block_sends_after: Option<usize>,
    hold_open: bool,
    fail_when_exhausted: bool,
}

impl LoopbackConnector {
    /// Connections stay open after their script drains, like a healthy
    /// endpoint waiting for more input.
    pub fn new(scripts: Vec<Vec<String>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
            block_sends_after: None,
            hold_open: true,
            fail_when_exhausted: false,
        }
    }

    /// Connections end as soon as their script drains, like an endpoint
    /// dropping the exchange.
    pub fn flaky(scripts: Vec<Vec<String>>) -> Self {
        let mut c = Self::new(scripts);
        c.hold_open = false;
        c.fail_when_exhausted = true;
        c
    }

    /// The sink accepts this many messages per connection, then stalls
    /// forever. Six covers the preamble.
    pub fn with_blocked_sink(mut self, after: usize) -> Self {
        self.block_sends_after = Some(after);
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), CoreError> {
        let script = self.scripts.lock().unwrap().pop_front();
        let lines = match script {
            Some(lines) => lines,
            None if self.fail_when_exhausted => {
                return Err(CoreError::ConnectionFailed("no more connections".to_string()))
            }
            None => Vec::new(),
        };
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok((
            Box::new(LoopSink {
                sent: self.sent.clone(),
                sends: 0,
                block_after: self.block_sends_after,
            }),
            Box::new(LoopSource {
                lines: lines.into(),
                hold_open: self.hold_open,
            }),
        ))
    }
}

struct LoopSink {
    sent: Arc<Mutex<Vec<String>>>,
    sends: usize,
    block_after: Option<usize>,
}

#[async_trait]
impl TransportSink for LoopSink {
    async fn send(&mut self, text: String) -> Result<(), CoreError> {
        self.sends += 1;
        if let Some(limit) = self.block_after {
            if self.sends > limit {
                futures::future::pending::<()>().await;
            }
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

struct LoopSource {
    lines: VecDeque<String>,
    hold_open: bool,
}

#[async_trait]
impl TransportSource for LoopSource {
    async fn next(&mut self) -> Option<Result<String, CoreError>> {
        if let Some(line) = self.lines.pop_front() {
            return Some(Ok(line));
        }
        if self.hold_open {
            futures::future::pending::<()>().await;
        }
        None
    }
}

pub fn assistant_turn_start() -> String {
    r#"{"event":{"contentStart":{"promptName":"p","contentName":"c","type":"AUDIO","role":"ASSISTANT"}}}"#
        .to_string()
}

pub fn audio_output(seq: u64, pcm: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    format!(
        r#"{{"event":{{"audioOutput":{{"content":"{}","sequence":{seq}}}}}}}"#,
        B64.encode(bytes)
    )
}

/// A transcript text block closing mid-turn, as the endpoint emits between
/// audio chunks.
pub fn transcript_end() -> String {
    r#"{"event":{"contentEnd":{"contentName":"transcript-text","stopReason":"PARTIAL_TURN"}}}"#
        .to_string()
}

/// An audioOutput event whose payload is not valid base64.
pub fn garbled_audio_output(seq: u64) -> String {
    format!(r#"{{"event":{{"audioOutput":{{"content":"!!not-base64!!","sequence":{seq}}}}}}}"#)
}

pub fn turn_end() -> String {
    r#"{"event":{"contentEnd":{"stopReason":"END_TURN"}}}"#.to_string()
}

pub fn interrupted_end() -> String {
    r#"{"event":{"contentEnd":{"stopReason":"INTERRUPTED"}}}"#.to_string()
}

/// Actuator double that records every throttle call in order.
#[derive(Default)]
pub struct RecordingActuator {
    calls: Mutex<Vec<(MotorRole, f32)>>,
}

#[async_trait]
impl MotorActuator for RecordingActuator {
    async fn set_throttle(&self, motor: MotorRole, throttle: f32) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push((motor, throttle));
        Ok(())
    }
}

impl RecordingActuator {
    pub fn calls(&self) -> Vec<(MotorRole, f32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_for(&self, motor: MotorRole) -> Option<f32> {
        self.calls()
            .iter()
            .rev()
            .find(|(m, _)| *m == motor)
            .map(|(_, t)| *t)
    }
}

pub fn loud_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(vec![(0.8 * 32767.0) as i16; 1024], 24_000, seq)
}

pub fn quiet_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(vec![30i16; 1024], 24_000, seq)
}
