use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::types::MotorRole;

/// Physical throttle boundary. `set_throttle(role, 0.0)` is the neutral /
/// stop call. Calls for distinct roles may happen concurrently; calls for
/// the same role are serialized by the implementation.
#[async_trait]
pub trait MotorActuator: Send + Sync {
    async fn set_throttle(&self, motor: MotorRole, throttle: f32) -> Result<(), CoreError>;

    /// Neutral on every known motor. Used on teardown and shutdown.
    async fn all_neutral(&self) -> Result<(), CoreError> {
        self.set_throttle(MotorRole::Mouth, 0.0).await?;
        self.set_throttle(MotorRole::Torso, 0.0).await?;
        Ok(())
    }
}

/// Role -> driver channel assignment plus per-motor direction inversion.
#[derive(Debug, Clone, Copy)]
pub struct MotorWiring {
    pub mouth_channel: u8,
    pub torso_channel: u8,
    pub mouth_invert: bool,
    pub torso_invert: bool,
}

impl MotorWiring {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mouth_channel: cfg.mouth_channel,
            torso_channel: cfg.torso_channel,
            mouth_invert: cfg.mouth_invert,
            torso_invert: cfg.torso_invert,
        }
    }

    /// Effective (channel, signed throttle) for a logical command.
    pub fn resolve(&self, motor: MotorRole, throttle: f32) -> (u8, f32) {
        let throttle = throttle.clamp(-1.0, 1.0);
        match motor {
            MotorRole::Mouth => {
                let dir = if self.mouth_invert { -1.0 } else { 1.0 };
                (self.mouth_channel, throttle * dir)
            }
            MotorRole::Torso => {
                let dir = if self.torso_invert { -1.0 } else { 1.0 };
                (self.torso_channel, throttle * dir)
            }
        }
    }
}

/// Demo-mode stub: logs effective throttles instead of moving anything.
/// Call contract is identical to the real actuator.
pub struct LogActuator {
    wiring: MotorWiring,
}

impl LogActuator {
    pub fn new(wiring: MotorWiring) -> Self {
        Self { wiring }
    }
}

#[async_trait]
impl MotorActuator for LogActuator {
    async fn set_throttle(&self, motor: MotorRole, throttle: f32) -> Result<(), CoreError> {
        let (channel, effective) = self.wiring.resolve(motor, throttle);
        if effective != 0.0 {
            debug!(?motor, channel, throttle = effective, "motor throttle");
        }
        Ok(())
    }
}

/// Real-device boundary: newline-delimited `M<channel> <throttle>` commands
/// written to the motor driver's character device. The driver chip itself
/// (I2C/PWM) lives behind that device.
pub struct SerialActuator {
    wiring: MotorWiring,
    // One writer; per-motor serialization follows from the single stream.
    device: Mutex<tokio::fs::File>,
}

impl SerialActuator {
    pub async fn open(path: &Path, wiring: MotorWiring) -> Result<Self, CoreError> {
        let device = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| CoreError::DeviceUnavailable(format!("{}: {e}", path.display())))?;
        info!(device = %path.display(), "motor driver opened");
        Ok(Self {
            wiring,
            device: Mutex::new(device),
        })
    }
}

#[async_trait]
impl MotorActuator for SerialActuator {
    async fn set_throttle(&self, motor: MotorRole, throttle: f32) -> Result<(), CoreError> {
        let (channel, effective) = self.wiring.resolve(motor, throttle);
        let line = format!("M{channel} {effective:.3}\n");
        let mut device = self.device.lock().await;
        device
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::DeviceUnavailable(format!("motor write: {e}")))?;
        Ok(())
    }
}

/// Pick the actuator once at startup: real device when configured and
/// reachable, logging stub in demo mode, hard error otherwise.
pub async fn select_actuator(cfg: &Config) -> Result<Arc<dyn MotorActuator>, CoreError> {
    let wiring = MotorWiring::from_config(cfg);
    match &cfg.motor_device {
        Some(path) => match SerialActuator::open(path, wiring).await {
            Ok(actuator) => Ok(Arc::new(actuator)),
            Err(e) if cfg.demo_mode => {
                warn!("motor init failed ({e}), running demo actuator");
                Ok(Arc::new(LogActuator::new(wiring)))
            }
            Err(e) => Err(e),
        },
        None if cfg.demo_mode => {
            info!("no motor device configured, running demo actuator");
            Ok(Arc::new(LogActuator::new(wiring)))
        }
        None => Err(CoreError::DeviceUnavailable(
            "no motor device configured and demo mode is off".to_string(),
        )),
    }
}
