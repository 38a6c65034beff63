//! Argument shaping: turning what a caller typed into the message a command expects.
//!
//! A bad field never aborts the call. It is reported as a [`FieldIssue`], left unset,
//! and the remaining fields are still applied.

use crate::DispatchError;
use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Field name of single-value wrapper types (`UintValue`, `BoolValue`, ...).
pub const VALUE_FIELD: &str = "value";

/// A loosely typed literal as a caller supplies it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings, and symbolic enum names.
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug)]
pub enum CallArgs {
    None,
    /// A single positional value.
    Value(FieldValue),
    Fields(Vec<(String, FieldValue)>),
    /// A message the caller already built; passed through if the type matches.
    Message(DynamicMessage),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FieldIssue {
    #[error("skipping '{field}': not a field of {message} (fields: {known})")]
    UnknownField {
        field: String,
        message: String,
        known: String,
    },
    #[error("wrong value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("'{field}' must be one of {allowed}, got '{symbol}'")]
    UnknownSymbol {
        field: String,
        symbol: String,
        allowed: String,
    },
}

#[derive(Clone, Debug)]
pub struct Shaped {
    pub message: DynamicMessage,
    pub issues: Vec<FieldIssue>,
}

/// True for types whose only field is `value`; those accept a bare positional argument.
pub fn is_value_shortcut(desc: &MessageDescriptor) -> bool {
    desc.fields().len() == 1 && desc.get_field_by_name(VALUE_FIELD).is_some()
}

pub fn shape(desc: &MessageDescriptor, args: CallArgs) -> Result<Shaped, DispatchError> {
    let fields = match args {
        CallArgs::None => Vec::new(),
        CallArgs::Message(message) => {
            if message.descriptor() != *desc {
                return Err(DispatchError::MessageMismatch {
                    expected: desc.full_name().to_string(),
                    got: message.descriptor().full_name().to_string(),
                });
            }
            return Ok(Shaped { message, issues: Vec::new() });
        }
        CallArgs::Value(value) => {
            if !is_value_shortcut(desc) {
                debug!(msg_type = desc.name(), "positional value on a multi-field type");
            }
            vec![(VALUE_FIELD.to_string(), value)]
        }
        CallArgs::Fields(fields) => fields,
    };

    let mut message = DynamicMessage::new(desc.clone());
    let mut issues = Vec::new();
    for (name, value) in fields {
        let Some(field) = lookup(desc, &name) else {
            issues.push(FieldIssue::UnknownField {
                field: name,
                message: desc.name().to_string(),
                known: desc.fields().map(|f| f.name().to_string()).collect::<Vec<_>>().join(", "),
            });
            continue;
        };
        match convert(&field, value) {
            Ok(v) => match message.try_set_field(&field, v) {
                Ok(()) => debug!(field = field.name(), "field set"),
                Err(e) => issues.push(FieldIssue::InvalidValue {
                    field: field.name().to_string(),
                    reason: e.to_string(),
                }),
            },
            Err(issue) => issues.push(issue),
        }
    }
    for issue in &issues {
        warn!(msg_type = desc.name(), "{issue}");
    }
    Ok(Shaped { message, issues })
}

fn lookup(desc: &MessageDescriptor, name: &str) -> Option<FieldDescriptor> {
    desc.get_field_by_name(name)
        .or_else(|| desc.get_field_by_json_name(name))
}

fn invalid(field: &FieldDescriptor, reason: impl Into<String>) -> FieldIssue {
    FieldIssue::InvalidValue {
        field: field.name().to_string(),
        reason: reason.into(),
    }
}

fn int<T: TryFrom<i64>>(field: &FieldDescriptor, v: i64) -> Result<T, FieldIssue> {
    T::try_from(v).map_err(|_| invalid(field, format!("{v} is out of range for {:?}", field.kind())))
}

fn convert(field: &FieldDescriptor, value: FieldValue) -> Result<Value, FieldIssue> {
    if field.is_list() || field.is_map() {
        return Err(invalid(field, "repeated fields are not supported"));
    }
    let kind = field.kind();
    let converted = match (&kind, value) {
        (Kind::Bool, FieldValue::Bool(b)) => Value::Bool(b),
        (Kind::Int32 | Kind::Sint32 | Kind::Sfixed32, FieldValue::Int(v)) => Value::I32(int(field, v)?),
        (Kind::Int64 | Kind::Sint64 | Kind::Sfixed64, FieldValue::Int(v)) => Value::I64(v),
        (Kind::Uint32 | Kind::Fixed32, FieldValue::Int(v)) => Value::U32(int(field, v)?),
        (Kind::Uint64 | Kind::Fixed64, FieldValue::Int(v)) => Value::U64(int(field, v)?),
        (Kind::Float, FieldValue::Float(v)) => Value::F32(v as f32),
        (Kind::Float, FieldValue::Int(v)) => Value::F32(v as f32),
        (Kind::Double, FieldValue::Float(v)) => Value::F64(v),
        (Kind::Double, FieldValue::Int(v)) => Value::F64(v as f64),
        (Kind::String, FieldValue::Text(s)) => Value::String(s),
        (Kind::Bytes, FieldValue::Bytes(b)) => Value::Bytes(Bytes::from(b)),
        (Kind::Bytes, FieldValue::Text(s)) => Value::Bytes(Bytes::from(s.into_bytes())),
        (Kind::Enum(e), FieldValue::Text(symbol)) => match e.get_value_by_name(&symbol) {
            Some(v) => Value::EnumNumber(v.number()),
            None => {
                return Err(FieldIssue::UnknownSymbol {
                    field: field.name().to_string(),
                    symbol,
                    allowed: e.values().map(|v| v.name().to_string()).collect::<Vec<_>>().join(", "),
                })
            }
        },
        (Kind::Enum(e), other) => {
            return Err(invalid(field, format!("expects a symbol of {}, got {other:?}", e.name())))
        }
        (Kind::Message(m), _) => {
            return Err(invalid(field, format!("nested {} values are not supported", m.name())))
        }
        (kind, other) => return Err(invalid(field, format!("expects {kind:?}, got {other:?}"))),
    };
    Ok(converted)
}
