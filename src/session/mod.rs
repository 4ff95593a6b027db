pub mod driver;
pub mod machine;

pub use driver::{DriverChannels, SessionDriver};
pub use machine::{Effect, SessionMachine, State};
