pub mod motor;

pub use motor::{select_actuator, LogActuator, MotorActuator, MotorWiring, SerialActuator};
