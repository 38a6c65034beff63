//! Message types understood by the client.
//!
//! The built-in catalog declares the `rfquack` proto2 package the firmware speaks. A
//! compiled descriptor set (`protoc --include_imports -o rfquack.pb rfquack.proto`) can
//! replace it when the firmware grows new types.

use crate::SchemaError;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};
use quack_transport::topic::{strip_type_prefix, MESSAGE_TYPE_PREFIX};

pub const PACKAGE: &str = "rfquack";

/// Argument type of commands that take nothing.
pub const VOID_TYPE: &str = "rfquack_VoidValue";

pub const CMD_INFO_TYPE: &str = "rfquack_CmdInfo";

pub const PACKET_TYPE: &str = "rfquack_Packet";

#[derive(Clone, Copy)]
enum FieldType {
    Scalar(Type),
    Enum(&'static str),
    Message(&'static str),
}

use FieldType::{Enum, Message, Scalar};

type FieldRow = (&'static str, i32, FieldType);

const ENUMS: &[(&str, &[(&str, i32)])] = &[
    ("Mode", &[("IDLE", 0), ("RX", 1), ("TX", 2), ("REPEAT", 3), ("JAM", 4)]),
    ("Modulation", &[("OOK", 0), ("FSK2", 1), ("GFSK", 2)]),
    (
        "WhichRadio",
        &[("RadioA", 0), ("RadioB", 1), ("RadioC", 2), ("RadioD", 3), ("RadioE", 4)],
    ),
];

/// Enums declared inside a message: (parent, name, values).
const NESTED_ENUMS: &[(&str, &str, &[(&str, i32)])] = &[
    ("CmdInfo", "CmdTypeEnum", &[("ATTRIBUTE", 0), ("METHOD", 1)]),
    (
        "PacketModification",
        "Op",
        &[("AND", 0), ("OR", 1), ("XOR", 2), ("NOT", 3), ("SLEFT", 4), ("SRIGHT", 5)],
    ),
];

const MESSAGES: &[(&str, &[FieldRow])] = &[
    ("VoidValue", &[]),
    ("BoolValue", &[("value", 1, Scalar(Type::Bool))]),
    ("UintValue", &[("value", 1, Scalar(Type::Uint32))]),
    ("IntValue", &[("value", 1, Scalar(Type::Int32))]),
    ("FloatValue", &[("value", 1, Scalar(Type::Float))]),
    ("BytesValue", &[("value", 1, Scalar(Type::Bytes))]),
    ("WhichRadioValue", &[("value", 1, Enum("WhichRadio"))]),
    (
        "CmdInfo",
        &[
            ("argumentType", 1, Scalar(Type::String)),
            ("description", 2, Scalar(Type::String)),
            ("cmdType", 3, Enum("CmdInfo.CmdTypeEnum")),
        ],
    ),
    (
        "CmdReply",
        &[("result", 1, Scalar(Type::Int32)), ("message", 2, Scalar(Type::String))],
    ),
    (
        "Packet",
        &[
            ("data", 1, Scalar(Type::Bytes)),
            ("millis", 2, Scalar(Type::Uint32)),
            ("repeat", 3, Scalar(Type::Uint32)),
            ("delayMs", 4, Scalar(Type::Uint32)),
            ("RSSI", 5, Scalar(Type::Float)),
            ("rxRadio", 6, Enum("WhichRadio")),
            ("txRadio", 7, Enum("WhichRadio")),
        ],
    ),
    (
        "Register",
        &[("address", 1, Scalar(Type::Uint32)), ("value", 2, Scalar(Type::Uint32))],
    ),
    (
        "ModemConfig",
        &[
            ("carrierFreq", 1, Scalar(Type::Float)),
            ("txPower", 2, Scalar(Type::Int32)),
            ("preambleLen", 3, Scalar(Type::Uint32)),
            ("syncWords", 4, Scalar(Type::Bytes)),
            ("isHighPowerModule", 5, Scalar(Type::Bool)),
            ("bitRate", 6, Scalar(Type::Float)),
            ("frequencyDeviation", 7, Scalar(Type::Float)),
            ("rxBandwidth", 8, Scalar(Type::Float)),
            ("modulation", 9, Enum("Modulation")),
            ("useCRC", 10, Scalar(Type::Bool)),
            ("manchesterCoding", 11, Scalar(Type::Bool)),
            ("modemConfigChoiceIndex", 12, Scalar(Type::Uint32)),
        ],
    ),
    (
        "PacketLen",
        &[
            ("isFixedPacketLen", 1, Scalar(Type::Bool)),
            ("packetLen", 2, Scalar(Type::Uint32)),
        ],
    ),
    (
        "PacketFilter",
        &[("pattern", 1, Scalar(Type::String)), ("negateRule", 2, Scalar(Type::Bool))],
    ),
    (
        "PacketModification",
        &[
            ("position", 1, Scalar(Type::Uint32)),
            ("content", 2, Scalar(Type::Uint32)),
            ("operation", 3, Enum("PacketModification.Op")),
            ("operand", 4, Scalar(Type::Uint32)),
            ("pattern", 5, Scalar(Type::String)),
        ],
    ),
    (
        "Stats",
        &[
            ("rx_packets", 1, Scalar(Type::Uint32)),
            ("tx_packets", 2, Scalar(Type::Uint32)),
            ("rx_failures", 3, Scalar(Type::Uint32)),
            ("tx_failures", 4, Scalar(Type::Uint32)),
            ("rx_queue", 5, Scalar(Type::Uint32)),
        ],
    ),
    (
        "Status",
        &[("mode", 1, Enum("Mode")), ("stats", 2, Message("Stats"))],
    ),
];

fn enum_proto(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(n, number)| EnumValueDescriptorProto {
                name: Some(n.to_string()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn field_proto((name, number, ty): &FieldRow) -> FieldDescriptorProto {
    let (kind, type_name) = match ty {
        Scalar(t) => (*t, None),
        Enum(n) => (Type::Enum, Some(format!(".{PACKAGE}.{n}"))),
        Message(n) => (Type::Message, Some(format!(".{PACKAGE}.{n}"))),
    };
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(*number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        type_name,
        ..Default::default()
    }
}

fn builtin_file() -> FileDescriptorProto {
    let message_type = MESSAGES
        .iter()
        .map(|(name, fields)| DescriptorProto {
            name: Some(name.to_string()),
            field: fields.iter().map(field_proto).collect(),
            enum_type: NESTED_ENUMS
                .iter()
                .filter(|(parent, _, _)| parent == name)
                .map(|(_, n, values)| enum_proto(n, values))
                .collect(),
            ..Default::default()
        })
        .collect();
    FileDescriptorProto {
        name: Some(format!("{PACKAGE}.proto")),
        package: Some(PACKAGE.to_string()),
        message_type,
        enum_type: ENUMS.iter().map(|(n, values)| enum_proto(n, values)).collect(),
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

/// Resolves wire type names (`rfquack_Packet`) to message descriptors.
#[derive(Clone, Debug)]
pub struct SchemaCatalog {
    pool: DescriptorPool,
}

impl SchemaCatalog {
    pub fn builtin() -> Result<Self, SchemaError> {
        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_proto(builtin_file())
            .map_err(|e| SchemaError::Descriptor(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Load an encoded `FileDescriptorSet`. Types are looked up in the `rfquack` package.
    pub fn from_descriptor_set(bytes: &[u8]) -> Result<Self, SchemaError> {
        let pool = DescriptorPool::decode(bytes).map_err(|e| SchemaError::Descriptor(e.to_string()))?;
        let catalog = Self { pool };
        catalog.resolve(CMD_INFO_TYPE)?;
        Ok(catalog)
    }

    /// Accepts the wire name or the bare local name.
    pub fn resolve(&self, message_type: &str) -> Result<MessageDescriptor, SchemaError> {
        let local = strip_type_prefix(message_type);
        self.pool
            .get_message_by_name(&format!("{PACKAGE}.{local}"))
            .ok_or_else(|| SchemaError::UnknownMessageType(message_type.to_string()))
    }

    pub fn decode(&self, message_type: &str, payload: &[u8]) -> Result<DynamicMessage, SchemaError> {
        let desc = self.resolve(message_type)?;
        DynamicMessage::decode(desc, payload).map_err(|e| SchemaError::Deserialization {
            type_name: message_type.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn empty(&self, message_type: &str) -> Result<DynamicMessage, SchemaError> {
        Ok(DynamicMessage::new(self.resolve(message_type)?))
    }

    /// Sorted wire names of every message in the package.
    pub fn message_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pool
            .all_messages()
            .filter(|m| m.package_name() == PACKAGE && m.parent_message().is_none())
            .map(|m| wire_name(&m))
            .collect();
        names.sort();
        names
    }
}

pub fn wire_name(desc: &MessageDescriptor) -> String {
    format!("{MESSAGE_TYPE_PREFIX}{}", desc.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use prost_reflect::Value;

    #[test]
    fn builtin_resolves_wire_and_local_names() -> anyhow::Result<()> {
        let catalog = SchemaCatalog::builtin()?;
        assert_eq!(catalog.resolve("rfquack_Packet")?.full_name(), "rfquack.Packet");
        assert_eq!(catalog.resolve("Register")?.name(), "Register");
        assert!(matches!(
            catalog.resolve("rfquack_Nope"),
            Err(SchemaError::UnknownMessageType(_))
        ));
        let names = catalog.message_names();
        assert!(names.contains(&"rfquack_CmdInfo".to_string()));
        assert!(names.contains(&VOID_TYPE.to_string()));
        assert!(!names.iter().any(|n| n.contains("CmdTypeEnum")));
        Ok(())
    }

    #[test]
    fn decodes_cmd_info() -> anyhow::Result<()> {
        let catalog = SchemaCatalog::builtin()?;
        let mut info = catalog.empty(CMD_INFO_TYPE)?;
        info.set_field_by_name("argumentType", Value::String(VOID_TYPE.to_string()));
        info.set_field_by_name("description", Value::String("Puts modem in RX mode".to_string()));
        info.set_field_by_name("cmdType", Value::EnumNumber(1));
        let bytes = info.encode_to_vec();

        let decoded = catalog.decode("rfquack_CmdInfo", &bytes)?;
        assert_eq!(
            decoded.get_field_by_name("argumentType").as_deref(),
            Some(&Value::String(VOID_TYPE.to_string()))
        );
        assert_eq!(decoded.get_field_by_name("cmdType").as_deref(), Some(&Value::EnumNumber(1)));
        Ok(())
    }

    #[test]
    fn garbage_is_a_deserialization_failure() -> anyhow::Result<()> {
        let catalog = SchemaCatalog::builtin()?;
        let err = catalog.decode("rfquack_Packet", &[0x0a, 0x05, 0x01]).err();
        assert!(matches!(err, Some(SchemaError::Deserialization { .. })));
        Ok(())
    }

    #[test]
    fn descriptor_set_round_trip() -> anyhow::Result<()> {
        let set = prost_types::FileDescriptorSet { file: vec![builtin_file()] };
        let catalog = SchemaCatalog::from_descriptor_set(&set.encode_to_vec())?;
        assert!(catalog.resolve("rfquack_ModemConfig").is_ok());
        assert!(matches!(
            SchemaCatalog::from_descriptor_set(b"\xff\xff"),
            Err(SchemaError::Descriptor(_))
        ));
        Ok(())
    }
}
