use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Session-scoped counters. Shared by `Arc`, updated lock-free from every
/// unit, reported and reset on session close.
#[derive(Debug, Default)]
pub struct Metrics {
    frames_dropped: AtomicU64,
    frames_late: AtomicU64,
    protocol_skips: AtomicU64,
    interrupts: AtomicU64,
    turns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_dropped: u64,
    pub frames_late: u64,
    pub protocol_skips: u64,
    pub interrupts: u64,
    pub turns: u64,
}

impl Metrics {
    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_late(&self) {
        self.frames_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_skip(&self) {
        self.protocol_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn(&self) {
        self.turns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            protocol_skips: self.protocol_skips.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            turns: self.turns.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter so the next session starts clean.
    pub fn reset(&self) {
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_late.store(0, Ordering::Relaxed);
        self.protocol_skips.store(0, Ordering::Relaxed);
        self.interrupts.store(0, Ordering::Relaxed);
        self.turns.store(0, Ordering::Relaxed);
    }

    pub fn report(&self) {
        let s = self.snapshot();
        info!(
            turns = s.turns,
            interrupts = s.interrupts,
            frames_dropped = s.frames_dropped,
            frames_late = s.frames_late,
            protocol_skips = s.protocol_skips,
            "session metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_the_session_counters() {
        let m = Metrics::default();
        m.turn();
        m.interrupt();
        m.frame_dropped();
        assert_ne!(m.snapshot(), MetricsSnapshot::default());

        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
