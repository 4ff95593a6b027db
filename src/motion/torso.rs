use std::time::{Duration, Instant};

use crate::config::Config;
use crate::types::{MotorCommand, MotorRole};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Neutral. `resume_at` re-engages the forward swing while speaking;
    /// `wag_at` fires the idle wag while not.
    Rest {
        resume_at: Option<Instant>,
        wag_at: Option<Instant>,
    },
    Forward { until: Instant },
    Back { until: Instant },
    WagOut { until: Instant },
    WagBack { until: Instant },
}

/// Torso motion as a deadline-driven cycle: forward throttle on turn
/// start, reverse for the return duration on turn end, neutral after,
/// re-engaging at a fixed cadence while the figure keeps speaking. While
/// idle, a small alternating wag fires every few seconds. All commands
/// come out of `engage`/`disengage`/`interrupt`/`tick`; the engine owns
/// the clock and the actuator.
#[derive(Debug)]
pub struct TorsoCycle {
    forward: f32,
    back: f32,
    forward_hold: Duration,
    back_hold: Duration,
    cadence: Duration,
    wag_interval: Duration,
    wag_throttle: f32,
    wag_hold: Duration,
    speaking: bool,
    phase: Phase,
}

impl TorsoCycle {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            forward: cfg.torso_forward,
            back: cfg.torso_back,
            forward_hold: cfg.torso_forward_hold,
            back_hold: cfg.torso_back_hold,
            cadence: cfg.torso_cadence,
            wag_interval: cfg.idle_wag_interval,
            wag_throttle: cfg.idle_wag_throttle,
            wag_hold: cfg.idle_wag_hold,
            speaking: false,
            phase: Phase::Rest {
                resume_at: None,
                wag_at: None,
            },
        }
    }

    pub fn start_idle(&mut self, now: Instant) {
        self.phase = Phase::Rest {
            resume_at: None,
            wag_at: Some(now + self.wag_interval),
        };
    }

    fn command(&self, throttle: f32) -> MotorCommand {
        MotorCommand {
            motor: MotorRole::Torso,
            throttle,
            hold: None,
        }
    }

    /// Turn started: swing forward.
    pub fn engage(&mut self, now: Instant) -> MotorCommand {
        self.speaking = true;
        self.phase = Phase::Forward {
            until: now + self.forward_hold,
        };
        self.command(self.forward)
    }

    /// Turn ended: reverse to the rest position, neutral afterwards.
    pub fn disengage(&mut self, now: Instant) -> MotorCommand {
        self.speaking = false;
        self.phase = Phase::Back {
            until: now + self.back_hold,
        };
        self.command(self.back)
    }

    /// Barge-in or shutdown: straight to neutral, no return swing.
    pub fn interrupt(&mut self, now: Instant) -> MotorCommand {
        self.speaking = false;
        self.start_idle(now);
        MotorCommand::neutral(MotorRole::Torso)
    }

    /// Next instant `tick` has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Rest { resume_at, wag_at } => {
                if self.speaking {
                    resume_at
                } else {
                    wag_at
                }
            }
            Phase::Forward { until }
            | Phase::Back { until }
            | Phase::WagOut { until }
            | Phase::WagBack { until } => Some(until),
        }
    }

    /// Advance through any phase transition that has come due.
    pub fn tick(&mut self, now: Instant) -> Vec<MotorCommand> {
        let mut out = Vec::new();
        loop {
            match self.phase {
                Phase::Forward { until } if now >= until => {
                    self.phase = Phase::Back {
                        until: now + self.back_hold,
                    };
                    out.push(self.command(self.back));
                }
                Phase::Back { until } if now >= until => {
                    out.push(MotorCommand::neutral(MotorRole::Torso));
                    self.phase = Phase::Rest {
                        resume_at: self.speaking.then(|| now + self.cadence),
                        wag_at: (!self.speaking).then(|| now + self.wag_interval),
                    };
                }
                Phase::Rest {
                    resume_at: Some(at),
                    ..
                } if self.speaking && now >= at => {
                    self.phase = Phase::Forward {
                        until: now + self.forward_hold,
                    };
                    out.push(self.command(self.forward));
                }
                Phase::Rest {
                    wag_at: Some(at), ..
                } if !self.speaking && now >= at => {
                    self.phase = Phase::WagOut {
                        until: now + self.wag_hold,
                    };
                    out.push(self.command(self.wag_throttle));
                }
                Phase::WagOut { until } if now >= until => {
                    self.phase = Phase::WagBack {
                        until: now + self.wag_hold,
                    };
                    out.push(self.command(-self.wag_throttle));
                }
                Phase::WagBack { until } if now >= until => {
                    out.push(MotorCommand::neutral(MotorRole::Torso));
                    self.phase = Phase::Rest {
                        resume_at: None,
                        wag_at: Some(now + self.wag_interval),
                    };
                }
                _ => break,
            }
        }
        out
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }
}
