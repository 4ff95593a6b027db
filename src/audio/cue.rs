use std::f32::consts::PI;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::warn;

use crate::config::Config;
use crate::types::AudioFrame;

const CHIRP_MS: usize = 300;
const CHIRP_AMPLITUDE: f32 = 0.4;
const FADE_MS: usize = 10;

/// A short earcon played at session boundaries. Loaded from a WAV when
/// one is configured, otherwise synthesized: a rising sweep greets, a
/// falling one says goodbye.
pub struct Cue {
    frames: Vec<AudioFrame>,
}

impl Cue {
    pub fn greeting(cfg: &Config) -> Self {
        Self::build(cfg, cfg.greeting_cue.as_deref(), true)
    }

    pub fn farewell(cfg: &Config) -> Self {
        Self::build(cfg, cfg.farewell_cue.as_deref(), false)
    }

    fn build(cfg: &Config, path: Option<&Path>, rising: bool) -> Self {
        let rate = cfg.playback_rate;
        let pcm = match path {
            Some(path) => match load_wav(path, rate) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!(path = %path.display(), "cue load failed, using synthesized tone: {e}");
                    chirp(rate, rising)
                }
            },
            None => chirp(rate, rising),
        };
        let frames = pcm
            .chunks(cfg.frame_samples)
            .enumerate()
            .map(|(i, chunk)| AudioFrame::new(chunk.to_vec(), rate, i as u64))
            .collect();
        Self { frames }
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }
}

fn load_wav(path: &Path, target_rate: u32) -> Result<Vec<i16>, hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let mono: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i16>()
            .step_by(channels)
            .collect::<Result<_, _>>()?,
        SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,
    };

    if spec.sample_rate == target_rate {
        Ok(mono)
    } else {
        Ok(resample_linear(&mono, spec.sample_rate, target_rate))
    }
}

/// Linear interpolation is plenty for a 300 ms earcon.
fn resample_linear(pcm: &[i16], from: u32, to: u32) -> Vec<i16> {
    if pcm.is_empty() {
        return Vec::new();
    }
    let out_len = (pcm.len() as u64 * to as u64 / from as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    let step = from as f64 / to as f64;
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = pcm[idx.min(pcm.len() - 1)] as f32;
        let b = pcm[(idx + 1).min(pcm.len() - 1)] as f32;
        out.push((a + (b - a) * frac) as i16);
    }
    out
}

fn chirp(rate: u32, rising: bool) -> Vec<i16> {
    let len = rate as usize * CHIRP_MS / 1000;
    let fade = rate as usize * FADE_MS / 1000;
    let (f0, f1) = if rising { (400.0, 900.0) } else { (900.0, 400.0) };
    let mut phase = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let t = i as f32 / len as f32;
        let freq = f0 + (f1 - f0) * t;
        phase += 2.0 * PI * freq / rate as f32;
        let envelope = if i < fade {
            i as f32 / fade as f32
        } else if i >= len - fade {
            (len - i) as f32 / fade as f32
        } else {
            1.0
        };
        let s = phase.sin() * CHIRP_AMPLITUDE * envelope;
        out.push((s * i16::MAX as f32) as i16);
    }
    out
}
