use std::collections::VecDeque;
use std::time::Duration;

use crate::types::{AmplitudeSample, AudioFrame};

/// Rolling loudness envelope over the response audio stream.
///
/// Per frame: RMS against 16-bit full scale, mean over a short smoothing
/// window, then mapped between a noise floor and a saturation ceiling to a
/// mouth opening in [0, 1]. Opening rises with a fast attack and falls
/// faster than it rises, and snaps shut after a short run of silence so
/// trailing noise doesn't leave the mouth ajar.
#[derive(Debug)]
pub struct EnvelopeTracker {
    min_threshold: f32,
    max_threshold: f32,
    shape: f32,
    attack: f32,
    close_speed: f32,
    window: VecDeque<f32>,
    window_len: usize,
    opening: f32,
    silence_run: u32,
    clock: Duration,
}

impl EnvelopeTracker {
    pub fn new() -> Self {
        Self {
            min_threshold: 0.015,
            max_threshold: 0.25,
            shape: 0.8,
            attack: 0.4,
            close_speed: 0.7,
            window: VecDeque::with_capacity(3),
            window_len: 3,
            opening: 0.0,
            silence_run: 0,
            clock: Duration::ZERO,
        }
    }

    /// Fold one playback frame into the envelope. Returns `None` for empty
    /// frames; otherwise the sample timestamp advances by the frame span,
    /// so timestamps are strictly increasing within a session.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<AmplitudeSample> {
        if frame.pcm.is_empty() {
            return None;
        }

        let sum_sq: f64 = frame
            .pcm
            .iter()
            .map(|&s| {
                let v = s as f64;
                v * v
            })
            .sum();
        let rms = (sum_sq / frame.pcm.len() as f64).sqrt() as f32 / 32768.0;

        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(rms);
        let smoothed = self.window.iter().sum::<f32>() / self.window.len() as f32;

        let target = if smoothed < self.min_threshold {
            self.silence_run += 1;
            0.0
        } else {
            self.silence_run = 0;
            let normalized = ((smoothed - self.min_threshold)
                / (self.max_threshold - self.min_threshold))
                .clamp(0.0, 1.0);
            normalized.powf(self.shape)
        };

        // Asymmetric approach: fast close, softer open.
        if target < self.opening {
            let step = (self.opening - target) * self.close_speed;
            self.opening = (self.opening - step).max(target);
        } else {
            let step = (target - self.opening) * self.attack;
            self.opening = (self.opening + step).min(target);
        }

        if self.silence_run > 2 {
            self.opening = 0.0;
        }

        self.clock += frame.span();
        Some(AmplitudeSample {
            level: self.opening.clamp(0.0, 1.0),
            at: self.clock,
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.opening = 0.0;
        self.silence_run = 0;
    }
}

impl Default for EnvelopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(level: f32, seq: u64) -> AudioFrame {
        let amp = (level * 32767.0) as i16;
        AudioFrame {
            pcm: Arc::from(vec![amp; 480]),
            sample_rate: 24_000,
            seq,
        }
    }

    #[test]
    fn silence_stays_closed() {
        let mut env = EnvelopeTracker::new();
        for seq in 0..5 {
            let sample = env.push(&frame(0.001, seq)).unwrap();
            assert_eq!(sample.level, 0.0);
        }
    }

    #[test]
    fn loud_audio_saturates() {
        let mut env = EnvelopeTracker::new();
        let mut last = 0.0;
        for seq in 0..10 {
            last = env.push(&frame(0.8, seq)).unwrap().level;
        }
        assert!(last > 0.95, "sustained loud audio should saturate, got {last}");
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut env = EnvelopeTracker::new();
        let mut prev = Duration::ZERO;
        for seq in 0..8 {
            let sample = env.push(&frame(0.3, seq)).unwrap();
            assert!(sample.at > prev);
            prev = sample.at;
        }
    }

    #[test]
    fn trailing_silence_closes_fast_and_snaps_shut() {
        let mut env = EnvelopeTracker::new();
        for seq in 0..10 {
            env.push(&frame(0.8, seq));
        }
        // The smoothing window takes two quiet frames to drain before the
        // closing step engages.
        let levels: Vec<f32> = (10..15)
            .map(|seq| env.push(&frame(0.001, seq)).unwrap().level)
            .collect();
        assert!(
            levels[2] < levels[1] * 0.4,
            "first closing step should cut the opening by more than half: {levels:?}"
        );
        assert_eq!(levels[4], 0.0, "a short silence run must snap fully shut");
    }
}
