//! Control core for a wall-mounted conversational animatronic. One
//! button starts a session; the microphone streams to a cloud speech
//! endpoint; response audio plays back while the mouth and torso move in
//! time with it.

pub mod audio;
pub mod buttons;
pub mod config;
pub mod error;
pub mod hw;
pub mod metrics;
pub mod motion;
pub mod session;
pub mod stream;
pub mod types;

pub use config::Config;
pub use error::{CoreError, ErrorKind};
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::{AmplitudeSample, AudioFrame, ControlEvent, MotorCommand, MotorRole};
