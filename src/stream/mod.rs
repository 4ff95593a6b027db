pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{Resequencer, StreamClient, StreamConfig, StreamEvent};
pub use transport::{Connector, TransportSink, TransportSource, WsConnector};
