use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;

/// One chunk of mono 16-bit PCM. Produced once, consumed by exactly one
/// pipeline stage. `seq` is monotonic within its direction (capture or
/// playback) for a single session.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Arc<[i16]>,
    pub sample_rate: u32,
    pub seq: u64,
}

impl AudioFrame {
    pub fn new(pcm: Vec<i16>, sample_rate: u32, seq: u64) -> Self {
        Self {
            pcm: pcm.into(),
            sample_rate,
            seq,
        }
    }

    /// Wall-clock span this frame covers at its sample rate.
    pub fn span(&self) -> Duration {
        Duration::from_secs_f64(self.pcm.len() as f64 / self.sample_rate as f64)
    }
}

/// Smoothed loudness of one playback window, normalized to [0, 1].
/// Timestamps strictly increase within a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeSample {
    pub level: f32,
    pub at: Duration,
}

/// Logical motor assignment. Channel numbers and direction inversion are
/// applied at the actuator boundary, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorRole {
    Mouth,
    Torso,
}

/// Fire-and-forget throttle command. `hold: Some(d)` means the issuer
/// schedules the return to neutral after `d`; `None` holds until the next
/// command for the same motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCommand {
    pub motor: MotorRole,
    pub throttle: f32,
    pub hold: Option<Duration>,
}

impl MotorCommand {
    pub fn neutral(motor: MotorRole) -> Self {
        Self {
            motor,
            throttle: 0.0,
            hold: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.throttle == 0.0
    }
}

/// Everything that drives the session state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Debounced toggle button edge.
    ButtonPressed,
    /// Shutdown button or Ctrl-C.
    ShutdownRequested,
    /// Remote exchange established and preamble acknowledged.
    SessionStarted,
    /// Remote side closed the exchange.
    SessionEnded,
    /// Response audio for a new turn began.
    TurnStarted,
    /// End-of-turn marker from the endpoint.
    TurnEnded,
    /// Barge-in: user speech while the figure was speaking.
    Interrupted,
    Error(ErrorKind, String),
}
