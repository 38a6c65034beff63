use quack_registry::DispatchError;
use quack_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = SessionError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport not ready")]
    NotReady,
    #[error("no such device: {0}")]
    UnknownDevice(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot start dispatcher: {0}")]
    Spawn(String),
    #[error("metrics init error: {0}")]
    Metrics(String),
}
