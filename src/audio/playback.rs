use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::types::AudioFrame;

const RESAMPLE_CHUNK: usize = 1024;

/// Handle to the playback path. Frames enqueue in order; `flush` discards
/// everything buffered but not yet audible, which is what barge-in needs.
pub struct Playback {
    tx: mpsc::Sender<AudioFrame>,
    epoch: Arc<AtomicU64>,
    _guard: PlaybackGuard,
}

struct PlaybackGuard {
    _stream: Option<cpal::Stream>,
}

// SAFETY: the guard only holds the stream alive and never touches it after
// construction; on the ALSA backend the underlying PCM handle is safe to
// move across threads even though cpal conservatively marks it `!Send`.
unsafe impl Send for PlaybackGuard {}
unsafe impl Sync for PlaybackGuard {}

impl Playback {
    pub async fn enqueue(&self, frame: AudioFrame) {
        if self.tx.send(frame).await.is_err() {
            warn!("playback feeder gone, frame discarded");
        }
    }

    /// Drop all buffered audio. The feeder and the device callback both
    /// watch the epoch and drain on the next touch.
    pub fn flush(&self) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }
}

/// Opens the output device, falling back to the paced demo sink when the
/// hardware is missing and `demo_mode` is set.
pub fn start_playback(cfg: &Config) -> Result<Playback, CoreError> {
    let (tx, rx) = mpsc::channel(256);
    let epoch = Arc::new(AtomicU64::new(0));

    match open_device(cfg, epoch.clone()) {
        Ok((stream, prod, device_rate)) => {
            spawn_feeder(cfg.playback_rate, device_rate, rx, prod, epoch.clone())?;
            Ok(Playback {
                tx,
                epoch,
                _guard: PlaybackGuard {
                    _stream: Some(stream),
                },
            })
        }
        Err(e) if cfg.demo_mode => {
            warn!("playback init failed ({e}), running demo sink");
            Ok(demo_playback(tx, rx, epoch))
        }
        Err(e) => Err(e),
    }
}

fn open_device(
    cfg: &Config,
    epoch: Arc<AtomicU64>,
) -> Result<(cpal::Stream, HeapProd<f32>, u32), CoreError> {
    let host = cpal::default_host();
    let device = match &cfg.output_device {
        Some(name) => host
            .output_devices()
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| {
                CoreError::DeviceUnavailable(format!("output device {name:?} not found"))
            })?,
        None => host
            .default_output_device()
            .ok_or_else(|| CoreError::DeviceUnavailable("no output device".to_string()))?,
    };
    info!(device = %device.name().unwrap_or_default(), "opening playback device");

    // Prefer running the device at the response rate; otherwise take a
    // common rate and resample into it.
    let mut candidates = vec![cfg.playback_rate, 48_000, 44_100];
    candidates.dedup();
    let mut selected = None;
    for &rate in &candidates {
        let configs = device
            .supported_output_configs()
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?;
        for c in configs {
            if c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate().0 <= rate
                && c.max_sample_rate().0 >= rate
            {
                selected = Some((c.with_sample_rate(cpal::SampleRate(rate)), rate));
                break;
            }
        }
        if selected.is_some() {
            break;
        }
    }
    let (supported, device_rate) = selected.ok_or_else(|| {
        CoreError::DeviceUnavailable("no f32 output config at a usable rate".to_string())
    })?;
    let channels = supported.channels() as usize;
    info!(device_rate, channels, "playback config selected");

    // Two seconds of buffered audio between the feeder and the callback.
    let ring = HeapRb::<f32>::new(device_rate as usize * 2);
    let (prod, mut cons) = ring.split();

    let cb_epoch = epoch.clone();
    let mut cb_seen = 0u64;
    let err_fn = |err| error!("playback stream error: {err}");
    let stream = device
        .build_output_stream(
            &supported.into(),
            move |data: &mut [f32], _: &_| {
                let e = cb_epoch.load(Ordering::Relaxed);
                if e != cb_seen {
                    cb_seen = e;
                    while cons.try_pop().is_some() {}
                }
                for out in data.chunks_mut(channels) {
                    // Zero-fill on underrun.
                    let s = cons.try_pop().unwrap_or(0.0);
                    for ch in out {
                        *ch = s;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?;
    stream
        .play()
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?;

    Ok((stream, prod, device_rate))
}

fn spawn_feeder<P>(
    frame_rate: u32,
    device_rate: u32,
    mut rx: mpsc::Receiver<AudioFrame>,
    mut prod: P,
    epoch: Arc<AtomicU64>,
) -> Result<(), CoreError>
where
    P: Producer<Item = f32> + Send + 'static,
{
    let mut resampler = if frame_rate != device_rate {
        let r = FftFixedIn::<f32>::new(
            frame_rate as usize,
            device_rate as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| CoreError::DeviceUnavailable(format!("resampler: {e}")))?;
        info!(frame_rate, device_rate, "resampling playback audio");
        Some(r)
    } else {
        None
    };

    thread::Builder::new()
        .name("playback-feeder".to_string())
        .spawn(move || {
            let mut pending: Vec<f32> = Vec::new();
            let mut seen = 0u64;
            while let Some(frame) = rx.blocking_recv() {
                let e = epoch.load(Ordering::Relaxed);
                if e != seen {
                    seen = e;
                    pending.clear();
                }
                pending.extend(frame.pcm.iter().map(|&s| s as f32 / 32768.0));

                match &mut resampler {
                    None => {
                        let data = std::mem::take(&mut pending);
                        if !push_all(&mut prod, &data, &epoch, &mut seen) {
                            pending.clear();
                        }
                    }
                    Some(r) => {
                        while pending.len() >= RESAMPLE_CHUNK {
                            let block: Vec<f32> = pending.drain(..RESAMPLE_CHUNK).collect();
                            match r.process(&[block], None) {
                                Ok(out) => {
                                    if !push_all(&mut prod, &out[0], &epoch, &mut seen) {
                                        pending.clear();
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!("resample failed, block dropped: {e}");
                                }
                            }
                        }
                    }
                }
            }
        })
        .map_err(|e| CoreError::DeviceUnavailable(format!("feeder thread: {e}")))?;
    Ok(())
}

/// Push a block into the ring, waiting out a full buffer. Returns false
/// when a flush arrived mid-block; the caller abandons its backlog.
fn push_all<P>(prod: &mut P, data: &[f32], epoch: &AtomicU64, seen: &mut u64) -> bool
where
    P: Producer<Item = f32>,
{
    let mut written = 0;
    while written < data.len() {
        written += prod.push_slice(&data[written..]);
        if written < data.len() {
            let e = epoch.load(Ordering::Relaxed);
            if e != *seen {
                *seen = e;
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
    true
}

/// Real-time sink with no device: consume frames at their natural pace so
/// upstream timing still behaves.
fn demo_playback(
    tx: mpsc::Sender<AudioFrame>,
    mut rx: mpsc::Receiver<AudioFrame>,
    epoch: Arc<AtomicU64>,
) -> Playback {
    warn!("playback running in demo mode, discarding audio");
    let _ = thread::Builder::new()
        .name("playback-demo".to_string())
        .spawn(move || {
            while let Some(frame) = rx.blocking_recv() {
                thread::sleep(frame.span());
            }
        });
    Playback {
        tx,
        epoch,
        _guard: PlaybackGuard { _stream: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_mode_survives_missing_hardware() {
        // With or without a real output device, demo mode never fails open.
        let cfg = Config::default();
        assert!(start_playback(&cfg).is_ok());
    }
}
