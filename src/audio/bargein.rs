use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::types::ControlEvent;

const SUBFRAME_MS: usize = 30;
const MIN_SPEECH_SUBFRAMES: usize = 3;

/// Voice-activity gate for barge-in.
///
/// Consumes the capture tap on its own thread, slices frames into 30 ms
/// detector subframes, and debounces: three consecutive voiced subframes
/// raise one `Interrupted` event. The `speaking` watch gates the whole
/// detector; while the figure is silent, user speech is just the next
/// utterance and raises nothing.
pub struct BargeInDetector {
    rx: Receiver<crate::types::AudioFrame>,
    speaking: watch::Receiver<bool>,
    events: mpsc::Sender<ControlEvent>,
    sample_rate: u32,
}

impl BargeInDetector {
    pub fn new(
        rx: Receiver<crate::types::AudioFrame>,
        speaking: watch::Receiver<bool>,
        events: mpsc::Sender<ControlEvent>,
        sample_rate: u32,
    ) -> Self {
        Self {
            rx,
            speaking,
            events,
            sample_rate,
        }
    }

    pub fn spawn(self) {
        let _ = thread::Builder::new()
            .name("barge-in".to_string())
            .spawn(move || self.run());
    }

    fn run(self) {
        let rate = match self.sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => {
                warn!(rate = other, "barge-in disabled, rate unsupported by detector");
                return;
            }
        };
        let mut vad = Vad::new_with_rate_and_mode(rate, VadMode::Aggressive);
        let subframe = self.sample_rate as usize * SUBFRAME_MS / 1000;

        info!(rate = self.sample_rate, "barge-in detector started");
        let mut pending: Vec<i16> = Vec::new();
        let mut consecutive = 0usize;
        let mut triggered = false;

        loop {
            let frame = match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if !*self.speaking.borrow() {
                // Figure is silent; re-arm for the next turn.
                pending.clear();
                consecutive = 0;
                triggered = false;
                continue;
            }

            pending.extend_from_slice(&frame.pcm);
            while pending.len() >= subframe {
                let chunk: Vec<i16> = pending.drain(..subframe).collect();
                let voiced = vad.is_voice_segment(&chunk).unwrap_or(false);
                if voiced {
                    consecutive += 1;
                } else {
                    consecutive = 0;
                }
                if !triggered && consecutive >= MIN_SPEECH_SUBFRAMES {
                    triggered = true;
                    debug!("user speech over response audio");
                    if self.events.blocking_send(ControlEvent::Interrupted).is_err() {
                        return;
                    }
                }
            }
        }
        info!("barge-in detector stopped");
    }
}
