use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hw::MotorActuator;
use crate::metrics::Metrics;
use crate::motion::{EnvelopeTracker, MouthMapper, TorsoCycle};
use crate::types::{AudioFrame, MotorCommand, MotorRole};

/// Commands into the synchronization engine, in arrival order.
#[derive(Debug)]
pub enum MotionCommand {
    /// Response audio for a turn began.
    TurnStarted,
    /// One playback frame, already resequenced.
    Frame(AudioFrame),
    /// End-of-turn marker.
    TurnEnded,
    /// Barge-in or teardown: everything to neutral now.
    Interrupt,
    /// Process exit: neutral and stop.
    Shutdown,
}

/// Audio-to-motion synchronization engine.
///
/// Consumes playback frames and turn lifecycle commands, drives the mouth
/// with amplitude-shaped pulses and the torso with the speaking cycle.
/// A new mouth pulse supersedes the in-flight one; the scheduled neutral
/// belongs to whichever pulse was issued last. Actuator calls are bounded
/// by `motor_timeout` and dropped on stall. This task never fails upward:
/// any internal error degrades to no motion.
pub struct MotionEngine {
    rx: mpsc::Receiver<MotionCommand>,
    actuator: Arc<dyn MotorActuator>,
    metrics: Arc<Metrics>,
    envelope: EnvelopeTracker,
    mouth: MouthMapper,
    torso: TorsoCycle,
    motor_timeout: Duration,
    speaking: bool,
    mouth_neutral_at: Option<Instant>,
}

impl MotionEngine {
    pub fn new(
        cfg: &Config,
        rx: mpsc::Receiver<MotionCommand>,
        actuator: Arc<dyn MotorActuator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut torso = TorsoCycle::from_config(cfg);
        torso.start_idle(Instant::now());
        Self {
            rx,
            actuator,
            metrics,
            envelope: EnvelopeTracker::new(),
            mouth: MouthMapper::from_config(cfg),
            torso,
            motor_timeout: cfg.motor_timeout,
            speaking: false,
            mouth_neutral_at: None,
        }
    }

    pub async fn run(mut self) {
        info!("motion engine started");
        loop {
            let now = Instant::now();
            let mouth_due = self.mouth_neutral_at;
            let torso_due = self.torso.deadline();
            let far = now + Duration::from_secs(3600);

            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = sleep_until(tokio::time::Instant::from_std(mouth_due.unwrap_or(far))),
                    if mouth_due.is_some() =>
                {
                    self.mouth_neutral_at = None;
                    self.issue(MotorCommand::neutral(MotorRole::Mouth)).await;
                }
                _ = sleep_until(tokio::time::Instant::from_std(torso_due.unwrap_or(far))),
                    if torso_due.is_some() =>
                {
                    for cmd in self.torso.tick(Instant::now()) {
                        self.issue(cmd).await;
                    }
                }
            }
        }
        self.neutral_all().await;
        info!("motion engine stopped");
    }

    /// Returns false when the engine should stop.
    async fn handle(&mut self, cmd: MotionCommand) -> bool {
        let now = Instant::now();
        match cmd {
            MotionCommand::TurnStarted => {
                self.metrics.turn();
                self.speaking = true;
                self.envelope.reset();
                let fwd = self.torso.engage(now);
                self.issue(fwd).await;
            }
            MotionCommand::Frame(frame) => {
                // Mouth motion only exists inside a turn.
                if !self.speaking {
                    return true;
                }
                if let Some(sample) = self.envelope.push(&frame) {
                    match self.mouth.pulse(&sample) {
                        Some(pulse) => {
                            let hold = pulse.hold.unwrap_or(Duration::ZERO);
                            // Supersede any in-flight pulse.
                            self.mouth_neutral_at = Some(now + hold);
                            self.issue(pulse).await;
                        }
                        None => {
                            debug!(level = sample.level, "below deadband");
                        }
                    }
                }
            }
            MotionCommand::TurnEnded => {
                self.speaking = false;
                self.mouth_neutral_at = None;
                self.issue(MotorCommand::neutral(MotorRole::Mouth)).await;
                let back = self.torso.disengage(now);
                self.issue(back).await;
            }
            MotionCommand::Interrupt => {
                self.metrics.interrupt();
                self.speaking = false;
                self.mouth_neutral_at = None;
                self.envelope.reset();
                self.issue(MotorCommand::neutral(MotorRole::Mouth)).await;
                let stop = self.torso.interrupt(now);
                self.issue(stop).await;
            }
            MotionCommand::Shutdown => {
                return false;
            }
        }
        true
    }

    async fn issue(&self, cmd: MotorCommand) {
        match timeout(
            self.motor_timeout,
            self.actuator.set_throttle(cmd.motor, cmd.throttle),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("motor command dropped: {e}"),
            Err(_) => warn!(motor = ?cmd.motor, "actuator stalled, command dropped"),
        }
    }

    async fn neutral_all(&self) {
        match timeout(self.motor_timeout, self.actuator.all_neutral()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("neutral-all failed: {e}"),
            Err(_) => warn!("neutral-all timed out"),
        }
    }
}
