use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::types::AudioFrame;

/// Keeps the capture path alive. Dropping it stops the device stream and
/// signals the framing thread to wind down.
pub struct CaptureGuard {
    _stream: Option<cpal::Stream>,
    stop: Arc<AtomicBool>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Opens the microphone at the configured rate and starts the framing
/// thread. Each full frame goes to `uplink` for the remote endpoint and,
/// as a cheap clone, to `vad` for barge-in detection. When the device is
/// missing or misconfigured and `demo_mode` is set, a paced silence
/// generator stands in for the hardware.
pub fn start_capture(
    cfg: &Config,
    uplink: mpsc::Sender<AudioFrame>,
    vad: std::sync::mpsc::Sender<AudioFrame>,
) -> Result<CaptureGuard, CoreError> {
    match device_capture(cfg, uplink.clone(), vad.clone()) {
        Ok(guard) => Ok(guard),
        Err(e) if cfg.demo_mode => {
            warn!("capture init failed ({e}), running demo source");
            Ok(demo_capture(cfg, uplink, vad))
        }
        Err(e) => Err(e),
    }
}

fn device_capture(
    cfg: &Config,
    uplink: mpsc::Sender<AudioFrame>,
    vad: std::sync::mpsc::Sender<AudioFrame>,
) -> Result<CaptureGuard, CoreError> {
    let host = cpal::default_host();
    let device = match &cfg.input_device {
        Some(name) => host
            .input_devices()
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| {
                CoreError::DeviceUnavailable(format!("input device {name:?} not found"))
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| CoreError::DeviceUnavailable("no input device".to_string()))?,
    };
    info!(device = %device.name().unwrap_or_default(), "opening capture device");

    let rate = cfg.capture_rate;
    let supported = device
        .supported_input_configs()
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?
        .find(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .ok_or_else(|| {
            CoreError::DeviceUnavailable(format!("capture device does not support {rate} Hz"))
        })?
        .with_sample_rate(cpal::SampleRate(rate));
    let channels = supported.channels() as usize;
    info!(rate, channels, "capture config selected");

    // One second of headroom between the callback and the framing thread.
    let ring = HeapRb::<i16>::new(rate as usize);
    let (mut prod, mut cons) = ring.split();

    let err_fn = |err| error!("capture stream error: {err}");
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device
            .build_input_stream(
                &supported.into(),
                move |data: &[i16], _: &_| {
                    // Channel 0 only; drops on overrun are acceptable.
                    for frame in data.chunks(channels) {
                        let _ = prod.try_push(frame[0]);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?,
        cpal::SampleFormat::F32 => device
            .build_input_stream(
                &supported.into(),
                move |data: &[f32], _: &_| {
                    for frame in data.chunks(channels) {
                        let s = (frame[0].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        let _ = prod.try_push(s);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?,
        other => {
            return Err(CoreError::DeviceUnavailable(format!(
                "unsupported capture sample format {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let frame_samples = cfg.frame_samples;
    let thread_stop = stop.clone();
    thread::Builder::new()
        .name("capture-framing".to_string())
        .spawn(move || {
            let mut buf = vec![0i16; frame_samples];
            let mut seq = 0u64;
            while !thread_stop.load(Ordering::Relaxed) {
                if cons.occupied_len() < frame_samples {
                    thread::sleep(Duration::from_millis(5));
                    continue;
                }
                cons.pop_slice(&mut buf);
                let frame = AudioFrame::new(buf.clone(), rate, seq);
                seq += 1;
                let _ = vad.send(frame.clone());
                if uplink.blocking_send(frame).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| CoreError::DeviceUnavailable(format!("framing thread: {e}")))?;

    Ok(CaptureGuard {
        _stream: Some(stream),
        stop,
    })
}

/// Silence generator paced at the real frame rate. Keeps the rest of the
/// pipeline moving on machines with no microphone.
fn demo_capture(
    cfg: &Config,
    uplink: mpsc::Sender<AudioFrame>,
    vad: std::sync::mpsc::Sender<AudioFrame>,
) -> CaptureGuard {
    info!("capture running in demo mode, sending silence");
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let rate = cfg.capture_rate;
    let frame_samples = cfg.frame_samples;
    let pace = Duration::from_secs_f64(frame_samples as f64 / rate as f64);
    let _ = thread::Builder::new()
        .name("capture-demo".to_string())
        .spawn(move || {
            let mut seq = 0u64;
            while !thread_stop.load(Ordering::Relaxed) {
                let frame = AudioFrame::new(vec![0i16; frame_samples], rate, seq);
                seq += 1;
                let _ = vad.send(frame.clone());
                if uplink.blocking_send(frame).is_err() {
                    break;
                }
                thread::sleep(pace);
            }
        });
    CaptureGuard {
        _stream: None,
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_mode_survives_missing_hardware() {
        // With or without a real microphone, demo mode never fails open.
        let cfg = Config::default();
        let (tx, _rx) = mpsc::channel(4);
        let (vtx, _vrx) = std::sync::mpsc::channel();
        assert!(start_capture(&cfg, tx, vtx).is_ok());
    }
}
