//! Parses `FileDescriptorProto` bytes into structured descriptors.
//!
//! The parser walks tags and dispatches only on the small set of fields it
//! needs; everything else is skipped with
//! [`wire::Reader::skip_field`]. Field numbers below are the standard ones
//! from `google/protobuf/descriptor.proto` — this module is a partial,
//! hand-rolled reader for that one self-describing message, not a generic
//! protobuf-to-struct mapper.

use crate::wire::{Reader, WireError, WireType};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorParseError {
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
    #[error("message field with number {0} has no declared type")]
    MissingFieldType(i32),
    #[error("field descriptor with number {0} is missing a name")]
    MissingFieldName(i32),
    #[error("file descriptor is missing a name")]
    MissingFileName,
}

pub type DescriptorParseResult<T> = Result<T, DescriptorParseError>;

/// Protobuf `FieldDescriptorProto.Type`, values 1..=18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    Uint64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    Uint32 = 13,
    Enum = 14,
    Sfixed32 = 15,
    Sfixed64 = 16,
    Sint32 = 17,
    Sint64 = 18,
}

impl FieldType {
    pub fn from_i32(v: i32) -> Option<Self> {
        use FieldType::*;
        Some(match v {
            1 => Double,
            2 => Float,
            3 => Int64,
            4 => Uint64,
            5 => Int32,
            6 => Fixed64,
            7 => Fixed32,
            8 => Bool,
            9 => String,
            10 => Group,
            11 => Message,
            12 => Bytes,
            13 => Uint32,
            14 => Enum,
            15 => Sfixed32,
            16 => Sfixed64,
            17 => Sint32,
            18 => Sint64,
            _ => return None,
        })
    }

    pub fn is_message_or_group(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group)
    }

    pub fn is_enum(self) -> bool {
        matches!(self, FieldType::Enum)
    }

    /// proto3's packable scalar set: every scalar except string/bytes/message.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }
}

/// Protobuf `FieldDescriptorProto.Label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    Optional,
    Required,
    Repeated,
}

impl FieldLabel {
    fn from_i32(v: i32) -> Self {
        match v {
            2 => FieldLabel::Required,
            3 => FieldLabel::Repeated,
            _ => FieldLabel::Optional,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptorData {
    pub name: String,
    pub number: i32,
    pub label: FieldLabel,
    pub field_type: Option<FieldType>,
    /// Normalized (leading-dot stripped) dotted type name; present iff
    /// `field_type` is `Message`, `Group` or `Enum`.
    pub type_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnumValueData {
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Clone)]
pub struct EnumDescriptorData {
    pub name: String,
    pub values: Vec<EnumValueData>,
}

#[derive(Debug, Clone)]
pub struct MessageDescriptorData {
    pub name: String,
    pub fields: Vec<FieldDescriptorData>,
    pub nested_messages: Vec<MessageDescriptorData>,
    pub nested_enums: Vec<EnumDescriptorData>,
}

#[derive(Debug, Clone)]
pub struct MethodDescriptorData {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceDescriptorData {
    pub name: String,
    pub methods: Vec<MethodDescriptorData>,
}

#[derive(Debug, Clone, Default)]
pub struct FileDescriptorProtoData {
    pub name: String,
    pub package: String,
    pub dependencies: Vec<String>,
    pub messages: Vec<MessageDescriptorData>,
    pub enums: Vec<EnumDescriptorData>,
    pub services: Vec<ServiceDescriptorData>,
}

/// Strips a leading `.` (the fully-qualified marker in wire-format
/// `type_name`s).
pub fn strip_leading_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

pub fn parse_file_descriptor_proto(bytes: &[u8]) -> DescriptorParseResult<FileDescriptorProtoData> {
    let mut reader = Reader::new(bytes);
    let mut file = FileDescriptorProtoData::default();

    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag()?;
        match field_number {
            1 => file.name = read_string(&mut reader)?,
            2 => file.package = read_string(&mut reader)?,
            3 => file.dependencies.push(read_string(&mut reader)?),
            4 => file.messages.push(parse_message(&mut reader)?),
            5 => file.enums.push(parse_enum(&mut reader)?),
            6 => file.services.push(parse_service(&mut reader)?),
            _ => reader.skip_field(wire_type)?,
        }
    }

    if file.name.is_empty() {
        return Err(DescriptorParseError::MissingFileName);
    }

    Ok(file)
}

/// Parses a `FileDescriptorSet` (a bare `repeated FileDescriptorProto file = 1`)
/// into its individual files.
pub fn parse_file_descriptor_set(
    bytes: &[u8],
) -> DescriptorParseResult<Vec<FileDescriptorProtoData>> {
    let mut reader = Reader::new(bytes);
    let mut files = Vec::new();

    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag()?;
        if field_number == 1 {
            let inner = reader.read_length_delimited()?;
            files.push(parse_file_descriptor_proto(inner)?);
        } else {
            reader.skip_field(wire_type)?;
        }
    }

    Ok(files)
}

fn read_string(reader: &mut Reader) -> DescriptorParseResult<String> {
    let bytes = reader.read_length_delimited()?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn parse_message(reader: &mut Reader) -> DescriptorParseResult<MessageDescriptorData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);
    let mut msg = MessageDescriptorData {
        name: String::new(),
        fields: Vec::new(),
        nested_messages: Vec::new(),
        nested_enums: Vec::new(),
    };

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => msg.name = read_string(&mut inner)?,
            2 => msg.fields.push(parse_field(&mut inner)?),
            3 => msg.nested_messages.push(parse_message(&mut inner)?),
            4 => msg.nested_enums.push(parse_enum(&mut inner)?),
            _ => inner.skip_field(wire_type)?,
        }
    }

    Ok(msg)
}

fn parse_field(reader: &mut Reader) -> DescriptorParseResult<FieldDescriptorData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);

    let mut name = None;
    let mut number = None;
    let mut label = FieldLabel::Optional;
    let mut field_type = None;
    let mut type_name = None;

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => name = Some(read_string(&mut inner)?),
            3 => number = Some(inner.read_varint()? as i32),
            4 => label = FieldLabel::from_i32(inner.read_varint()? as i32),
            5 => field_type = FieldType::from_i32(inner.read_varint()? as i32),
            6 => {
                let raw = read_string(&mut inner)?;
                type_name = Some(strip_leading_dot(&raw).to_string());
            }
            _ => inner.skip_field(wire_type)?,
        }
    }

    let number = number.unwrap_or(0);
    let name = name.ok_or(DescriptorParseError::MissingFieldName(number))?;

    if let Some(ft) = field_type
        && (ft.is_message_or_group() || ft.is_enum())
        && type_name.is_none()
    {
        return Err(DescriptorParseError::MissingFieldType(number));
    }

    Ok(FieldDescriptorData {
        name,
        number,
        label,
        field_type,
        type_name,
    })
}

fn parse_enum(reader: &mut Reader) -> DescriptorParseResult<EnumDescriptorData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);
    let mut e = EnumDescriptorData {
        name: String::new(),
        values: Vec::new(),
    };

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => e.name = read_string(&mut inner)?,
            2 => e.values.push(parse_enum_value(&mut inner)?),
            _ => inner.skip_field(wire_type)?,
        }
    }

    Ok(e)
}

fn parse_enum_value(reader: &mut Reader) -> DescriptorParseResult<EnumValueData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);
    let mut name = String::new();
    let mut number = 0i32;

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => name = read_string(&mut inner)?,
            2 => number = inner.read_varint()? as i32,
            _ => inner.skip_field(wire_type)?,
        }
    }

    Ok(EnumValueData { name, number })
}

fn parse_service(reader: &mut Reader) -> DescriptorParseResult<ServiceDescriptorData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);
    let mut svc = ServiceDescriptorData {
        name: String::new(),
        methods: Vec::new(),
    };

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => svc.name = read_string(&mut inner)?,
            2 => svc.methods.push(parse_method(&mut inner)?),
            _ => inner.skip_field(wire_type)?,
        }
    }

    Ok(svc)
}

fn parse_method(reader: &mut Reader) -> DescriptorParseResult<MethodDescriptorData> {
    let bytes = reader.read_length_delimited()?;
    let mut inner = Reader::new(bytes);
    let mut name = String::new();
    let mut input_type = String::new();
    let mut output_type = String::new();
    let mut client_streaming = false;
    let mut server_streaming = false;

    while !inner.is_empty() {
        let (field_number, wire_type) = inner.read_tag()?;
        match field_number {
            1 => name = read_string(&mut inner)?,
            2 => input_type = strip_leading_dot(&read_string(&mut inner)?).to_string(),
            3 => output_type = strip_leading_dot(&read_string(&mut inner)?).to_string(),
            5 => client_streaming = inner.read_varint()? != 0,
            6 => server_streaming = inner.read_varint()? != 0,
            _ => inner.skip_field(wire_type)?,
        }
    }

    Ok(MethodDescriptorData {
        name,
        input_type,
        output_type,
        client_streaming,
        server_streaming,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Writer;

    fn encode_field(name: &str, number: i32, field_type: i32, type_name: Option<&str>) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_tag(1, WireType::LengthDelimited);
        w.write_length_delimited(name.as_bytes());
        w.write_tag(3, WireType::Varint);
        w.write_varint(number as u64);
        w.write_tag(5, WireType::Varint);
        w.write_varint(field_type as u64);
        if let Some(tn) = type_name {
            w.write_tag(6, WireType::LengthDelimited);
            w.write_length_delimited(tn.as_bytes());
        }
        w.into_vec()
    }

    fn encode_message(name: &str, fields: &[Vec<u8>]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_tag(1, WireType::LengthDelimited);
        w.write_length_delimited(name.as_bytes());
        for f in fields {
            w.write_tag(2, WireType::LengthDelimited);
            w.write_length_delimited(f);
        }
        w.into_vec()
    }

    #[test]
    fn parses_simple_message() {
        let id_field = encode_field("id", 1, FieldType::Int32 as i32, None);
        let name_field = encode_field("name", 2, FieldType::String as i32, None);
        let message = encode_message("Simple", &[id_field, name_field]);

        let mut file = Writer::new();
        file.write_tag(1, WireType::LengthDelimited);
        file.write_length_delimited(b"test.proto");
        file.write_tag(2, WireType::LengthDelimited);
        file.write_length_delimited(b"test");
        file.write_tag(4, WireType::LengthDelimited);
        file.write_length_delimited(&message);

        let parsed = parse_file_descriptor_proto(&file.into_vec()).unwrap();
        assert_eq!(parsed.name, "test.proto");
        assert_eq!(parsed.package, "test");
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].name, "Simple");
        assert_eq!(parsed.messages[0].fields.len(), 2);
        assert_eq!(parsed.messages[0].fields[0].name, "id");
        assert_eq!(parsed.messages[0].fields[0].number, 1);
    }

    #[test]
    fn strips_leading_dot_from_type_name() {
        let field = encode_field(
            "child",
            3,
            FieldType::Message as i32,
            Some(".test.Other"),
        );
        let message = encode_message("Parent", &[field]);
        let mut file = Writer::new();
        file.write_tag(1, WireType::LengthDelimited);
        file.write_length_delimited(b"test.proto");
        file.write_tag(4, WireType::LengthDelimited);
        file.write_length_delimited(&message);

        let parsed = parse_file_descriptor_proto(&file.into_vec()).unwrap();
        assert_eq!(
            parsed.messages[0].fields[0].type_name.as_deref(),
            Some("test.Other")
        );
    }

    #[test]
    fn missing_file_name_is_an_error() {
        let mut file = Writer::new();
        file.write_tag(2, WireType::LengthDelimited);
        file.write_length_delimited(b"test");
        assert!(matches!(
            parse_file_descriptor_proto(&file.into_vec()),
            Err(DescriptorParseError::MissingFileName)
        ));
    }

    #[test]
    fn parses_file_descriptor_set_with_two_files() {
        let mut a = Writer::new();
        a.write_tag(1, WireType::LengthDelimited);
        a.write_length_delimited(b"a.proto");
        let mut b = Writer::new();
        b.write_tag(1, WireType::LengthDelimited);
        b.write_length_delimited(b"b.proto");

        let mut set = Writer::new();
        set.write_tag(1, WireType::LengthDelimited);
        set.write_length_delimited(&a.into_vec());
        set.write_tag(1, WireType::LengthDelimited);
        set.write_length_delimited(&b.into_vec());

        let files = parse_file_descriptor_set(&set.into_vec()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.proto");
        assert_eq!(files[1].name, "b.proto");
    }

    #[test]
    fn unknown_top_level_fields_are_skipped() {
        let mut file = Writer::new();
        file.write_tag(1, WireType::LengthDelimited);
        file.write_length_delimited(b"test.proto");
        // Unknown field 99, varint.
        file.write_tag(99, WireType::Varint);
        file.write_varint(42);

        let parsed = parse_file_descriptor_proto(&file.into_vec()).unwrap();
        assert_eq!(parsed.name, "test.proto");
    }
}
