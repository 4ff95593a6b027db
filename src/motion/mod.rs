pub mod engine;
pub mod envelope;
pub mod mouth;
pub mod torso;

pub use engine::{MotionCommand, MotionEngine};
pub use envelope::EnvelopeTracker;
pub use mouth::MouthMapper;
pub use torso::TorsoCycle;
