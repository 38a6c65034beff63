use crate::{Result, Scope, TransportEvent};
use std::sync::mpsc::Sender;

/// A channel to one or more dongles. Implementations own a background receive path that
/// pushes accepted traffic onto the sink given to [`Transport::initialize`].
pub trait Transport: Send + Sync {
    /// Start receiving. Refused with `AlreadyInitialized` on a second call.
    fn initialize(&self, sink: Sender<TransportEvent>, scope: Scope) -> Result<()>;

    /// Change which scope inbound traffic is accepted from.
    fn set_scope(&self, scope: Scope) -> Result<()>;

    /// Best effort; no acknowledgment, no retry. `NotReady` before initialize or after
    /// shutdown.
    fn send(&self, topic: &str, payload: &[u8]) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Stop the receive path. Safe to call more than once and while a send is in flight.
    fn shutdown(&self);
}
