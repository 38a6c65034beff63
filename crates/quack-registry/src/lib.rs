//! quack-registry: the command surface a dongle describes about itself
//!
//! Dongles announce each command of each module with a `CmdInfo` message. This crate
//! keeps those descriptors per module, shapes caller arguments into the typed protobuf
//! message a command expects, and produces ready-to-send requests.

mod error;
pub use error::{DispatchError, Result, SchemaError};

pub mod schema;
pub use schema::SchemaCatalog;

pub mod shape;
pub use shape::{CallArgs, FieldIssue, FieldValue, Shaped};

mod registry;
pub use registry::{CommandDescriptor, CommandKind, DispatchRegistry, Module, Request};

pub use prost_reflect::{DynamicMessage, MessageDescriptor, Value};
