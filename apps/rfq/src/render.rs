use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, ReflectMessage, Value};
use std::fmt::Write as _;

/// Every field as `name = value`, followed by type-specific extras.
pub fn render(message: &DynamicMessage, json: bool) -> String {
    if json {
        if let Ok(text) = serde_json::to_string_pretty(message) {
            return text;
        }
    }
    let mut out = String::new();
    for field in message.descriptor().fields() {
        let value = message.get_field(&field);
        let _ = writeln!(out, "{} = {}", field.name(), format_value(&field, &value));
    }
    match message.descriptor().name() {
        "Register" => {
            let address = uint(message, "address");
            let value = uint(message, "value");
            let _ = writeln!(out, "0x{address:02X} = 0b{value:08b} (0x{value:02X}, {value})");
        }
        "Packet" => {
            let data = match message.get_field_by_name("data").as_deref() {
                Some(Value::Bytes(b)) => hex::encode(b),
                _ => String::new(),
            };
            let _ = writeln!(out, "hex data = {data}");
        }
        _ => {}
    }
    out
}

fn uint(message: &DynamicMessage, name: &str) -> u32 {
    match message.get_field_by_name(name).as_deref() {
        Some(Value::U32(v)) => *v,
        _ => 0,
    }
}

fn format_value(field: &FieldDescriptor, value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Bytes(b) => format!("h'{}'", hex::encode(b)),
        Value::EnumNumber(n) => match field.kind() {
            Kind::Enum(e) => e
                .get_value(*n)
                .map(|v| v.name().to_string())
                .unwrap_or_else(|| n.to_string()),
            _ => n.to_string(),
        },
        Value::Message(m) => {
            let inner: Vec<String> = m
                .descriptor()
                .fields()
                .map(|f| {
                    let v = m.get_field(&f);
                    format!("{} = {}", f.name(), format_value(&f, &v))
                })
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(|v| format_value(field, v)).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Map(map) => format!("{{{} entries}}", map.len()),
    }
}
