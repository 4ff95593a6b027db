use std::time::Duration;

use crate::config::Config;
use crate::types::{AmplitudeSample, MotorCommand, MotorRole};

/// Amplitude -> mouth pulse mapping with a deadband.
///
/// Openings below the deadband are silence: no command at all, so the
/// motor never chatters on the noise floor. Above it, throttle and hold
/// are interpolated over the configured ranges, both non-decreasing in
/// amplitude. The curve exponent defaults to 1.0 (linear).
#[derive(Debug, Clone)]
pub struct MouthMapper {
    deadband: f32,
    intensity_min: f32,
    intensity_max: f32,
    duration_min: Duration,
    duration_max: Duration,
    curve: f32,
}

impl MouthMapper {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            deadband: cfg.mouth_min_open,
            intensity_min: cfg.mouth_intensity_min,
            intensity_max: cfg.mouth_intensity_max,
            duration_min: cfg.mouth_duration_min,
            duration_max: cfg.mouth_duration_max,
            curve: cfg.mouth_curve,
        }
    }

    pub fn pulse(&self, sample: &AmplitudeSample) -> Option<MotorCommand> {
        if sample.level < self.deadband {
            return None;
        }
        let a = sample.level.clamp(0.0, 1.0).powf(self.curve);
        let throttle = self.intensity_min + a * (self.intensity_max - self.intensity_min);
        let hold =
            self.duration_min + self.duration_max.saturating_sub(self.duration_min).mul_f32(a);
        Some(MotorCommand {
            motor: MotorRole::Mouth,
            throttle: throttle.clamp(self.intensity_min, self.intensity_max),
            hold: Some(hold.clamp(self.duration_min, self.duration_max)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(level: f32) -> AmplitudeSample {
        AmplitudeSample {
            level,
            at: Duration::from_millis(1),
        }
    }

    fn mapper() -> MouthMapper {
        MouthMapper::from_config(&Config::default())
    }

    #[test]
    fn below_deadband_is_silent() {
        assert!(mapper().pulse(&sample(0.0)).is_none());
        assert!(mapper().pulse(&sample(0.05)).is_none());
        assert!(mapper().pulse(&sample(0.119)).is_none());
    }

    #[test]
    fn at_deadband_and_above_stays_in_range() {
        let m = mapper();
        for level in [0.12, 0.3, 0.6, 0.9, 1.0] {
            let cmd = m.pulse(&sample(level)).unwrap();
            assert!(cmd.throttle >= 0.2 && cmd.throttle <= 0.9);
            let hold = cmd.hold.unwrap();
            assert!(hold >= Duration::from_millis(25) && hold <= Duration::from_millis(80));
        }
    }

    #[test]
    fn throttle_and_hold_are_monotone() {
        let m = mapper();
        let mut prev: Option<MotorCommand> = None;
        for step in 12..=100 {
            let cmd = m.pulse(&sample(step as f32 / 100.0)).unwrap();
            if let Some(p) = prev {
                assert!(cmd.throttle >= p.throttle);
                assert!(cmd.hold.unwrap() >= p.hold.unwrap());
            }
            prev = Some(cmd);
        }
    }

    #[test]
    fn full_scale_hits_the_caps() {
        let cmd = mapper().pulse(&sample(1.0)).unwrap();
        assert!((cmd.throttle - 0.9).abs() < 1e-6);
        assert_eq!(cmd.hold.unwrap(), Duration::from_millis(80));
    }
}
