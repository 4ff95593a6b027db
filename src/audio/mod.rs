pub mod bargein;
pub mod capture;
pub mod cue;
pub mod playback;

pub use bargein::BargeInDetector;
pub use capture::{start_capture, CaptureGuard};
pub use cue::Cue;
pub use playback::{start_playback, Playback};
