//! quack-transport: addressing, framing and transports for RFQuack dongles
//!
//! Every message exchanged with a dongle is a topic plus a protobuf payload. This crate
//! parses and builds those topics, frames them on a serial byte stream, and hides the
//! physical channel behind the [`Transport`] trait. The default build enables a `mock`
//! backend so the session layer can be exercised without hardware; `serial` and `mqtt`
//! pull in the real backends.

mod types;
pub use types::{Direction, Inbound, PortInfo, Scope, Timestamp, TransportEvent, Verb};

mod error;
pub use error::{FrameError, Result, TopicError, TransportError};

pub mod frame;
pub use frame::{FrameDecoder, FrameEvent};

pub mod topic;
pub use topic::Address;

mod traits;
pub use traits::Transport;

mod stream;
pub use stream::StreamTransport;

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{list_ports, DEFAULT_BAUD_RATE};

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttSettings, MqttTransport, TlsMaterial};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockTransport, SentMessage};
