use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("port not found: {0}")]
    PortNotFound(String),
    #[error("missing connection parameter: {0}")]
    MissingParameter(&'static str),
    #[error("transport not ready")]
    NotReady,
    #[error("transport already initialized")]
    AlreadyInitialized,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error(
        "topic has {0} segments; expected <scope>/<direction>/<verb>/<module>/<message_type>(/<args>)*"
    )]
    TooFewSegments(usize),
    #[error("invalid direction: {0}")]
    InvalidDirection(String),
    #[error("topic is not valid UTF-8")]
    NotUtf8,
    #[error("scope {got} does not match {expected}")]
    ScopeMismatch { expected: String, got: String },
    #[error("inbound-direction topic ignored")]
    Echo,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected exactly one separator, found {0}")]
    Separators(usize),
    #[error("payload is not valid base64: {0}")]
    Base64(String),
    #[error("frame exceeds {0} bytes")]
    Overflow(usize),
    #[error("topic contains reserved byte 0x{0:02X}")]
    ReservedByte(u8),
}
