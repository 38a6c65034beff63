use thiserror::Error;

pub type Result<T, E = DispatchError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("cannot decode {type_name}: {reason}")]
    Deserialization { type_name: String, reason: String },
    #[error("invalid descriptor set: {0}")]
    Descriptor(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown module '{module}'; known modules: {known}")]
    UnknownModule { module: String, known: String },
    #[error("'{command}' not found in module '{module}'")]
    UnknownCommand {
        module: String,
        command: String,
        /// The module's current command list.
        help: String,
    },
    #[error("'{module}.{command}' is an attribute, not a method")]
    NotAMethod { module: String, command: String },
    #[error("'{module}.{command}' is a method, not an attribute")]
    NotAnAttribute { module: String, command: String },
    #[error("message of type {got} given where {expected} is expected")]
    MessageMismatch { expected: String, got: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
