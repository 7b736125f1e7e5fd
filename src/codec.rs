//! Encodes and decodes protobuf payloads against [`Registry`] descriptors,
//! with a schema-free ("blind") fallback decoder.
//!
//! Decoding never fails outright: every failure becomes a
//! [`Value::Error`] leaf so the rest of the message still comes through.
//! Encoding is the one direction that can fail hard, since there is no
//! sensible best-effort encoding of a malformed request.

use crate::descriptor::{FieldLabel, FieldType};
use crate::registry::{FieldDescriptor, MessageDescriptor, Registry};
use crate::value::{MapKey, MessageValue, Value};
use crate::wire::{Reader, WireResult, WireType, Writer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no descriptor found for type '{0}'")]
    SchemaMissing(String),
    #[error("field '{field}' expects a {expected} value")]
    TypeMismatch { field: String, expected: String },
}

pub type EncodeResult<T> = Result<T, EncodeError>;

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub strict_utf8: bool,
    pub blind_decode_threshold: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict_utf8: false,
            blind_decode_threshold: 0.8,
        }
    }
}

const MAX_BLIND_RECURSION_DEPTH: u32 = 32;

/// Decodes `bytes` as `type_name` if the registry resolves it, else falls
/// back to blind decoding.
pub fn decode(registry: &Registry, type_name: Option<&str>, bytes: &[u8], opts: &DecodeOptions) -> Value {
    match type_name.and_then(|t| registry.find_message(t)) {
        Some(descriptor) => decode_message(registry, descriptor, bytes, opts),
        None => blind_decode(bytes, opts, 0),
    }
}

fn decode_message(
    registry: &Registry,
    descriptor: &MessageDescriptor,
    bytes: &[u8],
    opts: &DecodeOptions,
) -> Value {
    let mut reader = Reader::new(bytes);
    let mut occurrences: Vec<(i32, Value)> = Vec::new();

    loop {
        if reader.is_empty() {
            break;
        }
        let (field_number, wire_type) = match reader.read_tag() {
            Ok(tag) => tag,
            Err(_) => break,
        };
        if field_number == 0 {
            break;
        }

        match descriptor.field_by_number(field_number as i32) {
            Some(field) => match decode_known_field(registry, field, wire_type, &mut reader, opts) {
                Ok(values) => {
                    for v in values {
                        occurrences.push((field_number as i32, v));
                    }
                }
                Err(message) => {
                    occurrences.push((field_number as i32, Value::Error(message)));
                    break;
                }
            },
            None => match decode_unknown_field(wire_type, &mut reader) {
                Ok(v) => occurrences.push((field_number as i32, v)),
                Err(message) => {
                    occurrences.push((field_number as i32, Value::Error(message.to_string())));
                    break;
                }
            },
        }
    }

    Value::Message(build_message_value(registry, descriptor, occurrences))
}

fn build_message_value(
    registry: &Registry,
    descriptor: &MessageDescriptor,
    occurrences: Vec<(i32, Value)>,
) -> MessageValue {
    let mut grouped: Vec<(i32, Vec<Value>)> = Vec::new();
    for (number, value) in occurrences {
        match grouped.iter_mut().find(|(n, _)| *n == number) {
            Some((_, values)) => values.push(value),
            None => grouped.push((number, vec![value])),
        }
    }

    let mut message = MessageValue::new(Some(descriptor.full_name.clone()));

    for (number, values) in grouped {
        match descriptor.field_by_number(number) {
            Some(field) if is_map_field(registry, field) => {
                let entries = values
                    .into_iter()
                    .filter_map(|v| map_entry_from_value(v))
                    .collect();
                message.insert_named(field.name.clone(), Value::Map(entries));
            }
            Some(field) if field.label == FieldLabel::Repeated => {
                message.insert_named(field.name.clone(), Value::Repeated(values));
            }
            Some(field) => {
                if let Some(last) = values.into_iter().next_back() {
                    message.insert_named(field.name.clone(), last);
                }
            }
            None => {
                let value = if values.len() == 1 {
                    values.into_iter().next().unwrap()
                } else {
                    Value::Repeated(values)
                };
                message.insert_unresolved(number, value);
            }
        }
    }

    message
}

fn is_map_field(registry: &Registry, field: &FieldDescriptor) -> bool {
    field.label == FieldLabel::Repeated
        && field.field_type == Some(FieldType::Message)
        && field
            .type_name
            .as_deref()
            .and_then(|t| registry.find_message(t))
            .is_some_and(MessageDescriptor::looks_like_map_entry)
}

fn map_entry_from_value(value: Value) -> Option<(MapKey, Value)> {
    let Value::Message(entry) = value else {
        return None;
    };
    let key = match entry.get("key")? {
        Value::Bool(b) => MapKey::Bool(*b),
        Value::Int(n) => MapKey::Int(*n),
        Value::UInt(n) => MapKey::UInt(*n),
        Value::BigInt(s) => MapKey::String(s.clone()),
        Value::String(s) => MapKey::String(s.clone()),
        _ => return None,
    };
    let value = entry.get("value")?.clone();
    Some((key, value))
}

fn decode_known_field(
    registry: &Registry,
    field: &FieldDescriptor,
    wire_type: WireType,
    reader: &mut Reader,
    opts: &DecodeOptions,
) -> Result<Vec<Value>, String> {
    let field_type = field
        .field_type
        .ok_or_else(|| "field has no declared type".to_string())?;

    if field_type == FieldType::Group {
        return Err("group fields are not supported".to_string());
    }

    if field_type == FieldType::Message {
        let bytes = reader.read_length_delimited().map_err(|e| e.to_string())?;
        let type_name = field.type_name.as_deref().unwrap_or_default();
        let value = match registry.find_message(type_name) {
            Some(nested) => decode_message(registry, nested, bytes, opts),
            None => blind_decode(bytes, opts, 0),
        };
        return Ok(vec![value]);
    }

    if field_type == FieldType::Enum {
        let number = reader.read_varint().map_err(|e| e.to_string())? as i32;
        let name = field
            .type_name
            .as_deref()
            .and_then(|t| registry.find_enum(t))
            .and_then(|e| e.name_for(number))
            .map(str::to_string);
        return Ok(vec![Value::Enum { number, name }]);
    }

    let packed_run = field.label == FieldLabel::Repeated
        && field_type.is_packable()
        && wire_type == WireType::LengthDelimited;

    if packed_run {
        let bytes = reader.read_length_delimited().map_err(|e| e.to_string())?;
        let mut inner = Reader::new(bytes);
        let mut out = Vec::new();
        while !inner.is_empty() {
            out.push(decode_scalar(field_type, &mut inner, opts).map_err(|e| e.to_string())?);
        }
        return Ok(out);
    }

    Ok(vec![
        decode_scalar(field_type, reader, opts).map_err(|e| e.to_string())?,
    ])
}

fn decode_scalar(field_type: FieldType, reader: &mut Reader, opts: &DecodeOptions) -> WireResult<Value> {
    use FieldType::*;
    Ok(match field_type {
        Double => Value::Double(reader.read_double()?),
        Float => Value::Float(reader.read_float()?),
        Int64 => Value::from_i64_precise(reader.read_varint()? as i64),
        Uint64 => Value::from_u64_precise(reader.read_varint()?),
        Int32 => Value::Int(reader.read_varint()? as i32 as i64),
        Fixed64 => Value::from_u64_precise(reader.read_fixed64()?),
        Fixed32 => Value::UInt(reader.read_fixed32()? as u64),
        Bool => Value::Bool(reader.read_varint()? != 0),
        String => {
            let bytes = reader.read_length_delimited()?;
            match std::str::from_utf8(bytes) {
                Ok(s) => Value::String(s.to_string()),
                Err(_) if opts.strict_utf8 => Value::Error("invalid utf-8 in string field".to_string()),
                Err(_) => Value::Bytes(bytes.to_vec()),
            }
        }
        Bytes => Value::Bytes(reader.read_length_delimited()?.to_vec()),
        Uint32 => Value::UInt(reader.read_varint()? as u32 as u64),
        Sfixed32 => Value::Int(reader.read_fixed32()? as i32 as i64),
        Sfixed64 => Value::from_i64_precise(reader.read_fixed64()? as i64),
        Sint32 => Value::Int(reader.read_sint32()? as i64),
        Sint64 => Value::from_i64_precise(reader.read_sint64()?),
        Group | Message | Enum => unreachable!("handled by the caller before reaching decode_scalar"),
    })
}

fn decode_unknown_field(wire_type: WireType, reader: &mut Reader) -> WireResult<Value> {
    Ok(match wire_type {
        WireType::Varint => Value::UInt(reader.read_varint()?),
        WireType::Fixed64 => Value::UInt(reader.read_fixed64()?),
        WireType::LengthDelimited => Value::Bytes(reader.read_length_delimited()?.to_vec()),
        WireType::Fixed32 => Value::UInt(reader.read_fixed32()? as u64),
        WireType::StartGroup | WireType::EndGroup => {
            reader.skip_field(wire_type)?;
            unreachable!("skip_field always errors on group wire types")
        }
    })
}

/// Reconstructs a best-effort tree when no descriptor is available: a
/// length-delimited run is first
/// tried as a nested message (accepted only if recursion consumes most of
/// the bytes and yields at least one field), then as UTF-8, then as hex.
fn blind_decode(bytes: &[u8], opts: &DecodeOptions, depth: u32) -> Value {
    blind_decode_with_consumed(bytes, opts, depth).0
}

/// Returns the decoded value plus how many of `bytes` were actually
/// consumed by the loop, so a caller one level up can judge whether this
/// was a plausible nested message (the 80%-consumed heuristic below).
fn blind_decode_with_consumed(bytes: &[u8], opts: &DecodeOptions, depth: u32) -> (Value, usize) {
    let mut reader = Reader::new(bytes);
    let mut message = MessageValue::new(None);

    loop {
        if reader.is_empty() {
            break;
        }
        let (field_number, wire_type) = match reader.read_tag() {
            Ok(tag) => tag,
            Err(_) => break,
        };
        if field_number == 0 {
            break;
        }

        let value = match wire_type {
            WireType::Varint => match reader.read_varint() {
                Ok(n) => Value::from_u64_precise(n),
                Err(_) => break,
            },
            WireType::Fixed64 => match reader.read_fixed64() {
                Ok(n) => Value::from_u64_precise(n),
                Err(_) => break,
            },
            WireType::Fixed32 => match reader.read_fixed32() {
                Ok(n) => Value::UInt(n as u64),
                Err(_) => break,
            },
            WireType::LengthDelimited => match reader.read_length_delimited() {
                Ok(inner) => blind_decode_length_delimited(inner, opts, depth),
                Err(_) => break,
            },
            WireType::StartGroup | WireType::EndGroup => break,
        };

        message.insert_unresolved(field_number as i32, value);
    }

    let consumed = reader.position();
    (Value::Message(message), consumed)
}

fn blind_decode_length_delimited(bytes: &[u8], opts: &DecodeOptions, depth: u32) -> Value {
    if depth < MAX_BLIND_RECURSION_DEPTH && !bytes.is_empty() {
        let (candidate, consumed) = blind_decode_with_consumed(bytes, opts, depth + 1);
        if let Value::Message(ref inner) = candidate {
            let consumed_fraction = consumed as f64 / bytes.len() as f64;
            if !inner.is_empty() && consumed_fraction >= opts.blind_decode_threshold {
                return candidate;
            }
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::String(hex_encode(bytes)),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Builds a zeroed value tree for `type_name` with every declared field
/// present at its default.
pub fn template(registry: &Registry, type_name: &str) -> EncodeResult<Value> {
    let descriptor = registry
        .find_message(type_name)
        .ok_or_else(|| EncodeError::SchemaMissing(type_name.to_string()))?;
    Ok(template_message(registry, descriptor))
}

fn template_message(registry: &Registry, descriptor: &MessageDescriptor) -> Value {
    let mut message = MessageValue::new(Some(descriptor.full_name.clone()));
    for field in &descriptor.fields {
        let value = if is_map_field(registry, field) {
            Value::Map(Vec::new())
        } else if field.label == FieldLabel::Repeated {
            Value::Repeated(Vec::new())
        } else {
            template_scalar(registry, field)
        };
        message.insert_named(field.name.clone(), value);
    }
    Value::Message(message)
}

fn template_scalar(registry: &Registry, field: &FieldDescriptor) -> Value {
    match field.field_type {
        Some(FieldType::Message) => field
            .type_name
            .as_deref()
            .and_then(|t| registry.find_message(t))
            .map(|m| template_message(registry, m))
            .unwrap_or(Value::Error("unresolved message type".to_string())),
        Some(FieldType::Enum) => {
            let name = field
                .type_name
                .as_deref()
                .and_then(|t| registry.find_enum(t))
                .and_then(|e| e.name_for(0))
                .map(str::to_string);
            Value::Enum { number: 0, name }
        }
        Some(FieldType::Bool) => Value::Bool(false),
        Some(FieldType::String) => Value::String(String::new()),
        Some(FieldType::Bytes) => Value::Bytes(Vec::new()),
        Some(FieldType::Float) => Value::Float(0.0),
        Some(FieldType::Double) => Value::Double(0.0),
        Some(_) => Value::Int(0),
        None => Value::Error("field has no declared type".to_string()),
    }
}

/// Encodes `value` as `type_name`. Fields absent from `value` are omitted
/// (no default emission); fields present in the tree but not in the
/// descriptor are ignored.
pub fn encode(registry: &Registry, type_name: &str, value: &Value) -> EncodeResult<Vec<u8>> {
    let descriptor = registry
        .find_message(type_name)
        .ok_or_else(|| EncodeError::SchemaMissing(type_name.to_string()))?;
    let Value::Message(message) = value else {
        return Err(EncodeError::TypeMismatch {
            field: type_name.to_string(),
            expected: "message".to_string(),
        });
    };
    encode_message(registry, descriptor, message)
}

fn encode_message(
    registry: &Registry,
    descriptor: &MessageDescriptor,
    message: &MessageValue,
) -> EncodeResult<Vec<u8>> {
    let mut writer = Writer::new();
    let mut fields = descriptor.fields.clone();
    fields.sort_by_key(|f| f.number);

    for field in &fields {
        let Some(value) = message.get(&field.name) else {
            continue;
        };
        encode_field(registry, &mut writer, field, value)?;
    }

    Ok(writer.into_vec())
}

fn encode_field(
    registry: &Registry,
    writer: &mut Writer,
    field: &FieldDescriptor,
    value: &Value,
) -> EncodeResult<()> {
    if is_map_field(registry, field) {
        let Value::Map(entries) = value else {
            return Err(type_mismatch(field, "map"));
        };
        let entry_descriptor = registry
            .find_message(field.type_name.as_deref().unwrap_or_default())
            .ok_or_else(|| EncodeError::SchemaMissing(field.type_name.clone().unwrap_or_default()))?;
        for (key, entry_value) in entries {
            let mut entry = MessageValue::new(Some(entry_descriptor.full_name.clone()));
            entry.insert_named("key", map_key_to_value(key));
            entry.insert_named("value", entry_value.clone());
            let bytes = encode_message(registry, entry_descriptor, &entry)?;
            writer.write_tag(field.number as u32, WireType::LengthDelimited);
            writer.write_length_delimited(&bytes);
        }
        return Ok(());
    }

    if field.label == FieldLabel::Repeated {
        let Value::Repeated(items) = value else {
            return Err(type_mismatch(field, "repeated"));
        };
        let field_type = field
            .field_type
            .ok_or_else(|| EncodeError::SchemaMissing(field.type_name.clone().unwrap_or_default()))?;

        if field.packed && field_type.is_packable() {
            let mut inner = Writer::new();
            for item in items {
                encode_scalar_value(&mut inner, field, field_type, item)?;
            }
            let bytes = inner.into_vec();
            writer.write_tag(field.number as u32, WireType::LengthDelimited);
            writer.write_length_delimited(&bytes);
        } else {
            for item in items {
                encode_singular(registry, writer, field, item)?;
            }
        }
        return Ok(());
    }

    encode_singular(registry, writer, field, value)
}

fn encode_singular(
    registry: &Registry,
    writer: &mut Writer,
    field: &FieldDescriptor,
    value: &Value,
) -> EncodeResult<()> {
    let field_type = field
        .field_type
        .ok_or_else(|| EncodeError::SchemaMissing(field.name.clone()))?;

    match field_type {
        FieldType::Group => Err(type_mismatch(field, "non-group")),
        FieldType::Message => {
            let Value::Message(nested) = value else {
                return Err(type_mismatch(field, "message"));
            };
            let nested_descriptor = registry
                .find_message(field.type_name.as_deref().unwrap_or_default())
                .ok_or_else(|| {
                    EncodeError::SchemaMissing(field.type_name.clone().unwrap_or_default())
                })?;
            let bytes = encode_message(registry, nested_descriptor, nested)?;
            writer.write_tag(field.number as u32, WireType::LengthDelimited);
            writer.write_length_delimited(&bytes);
            Ok(())
        }
        FieldType::Enum => {
            let Value::Enum { number, .. } = value else {
                return Err(type_mismatch(field, "enum"));
            };
            writer.write_tag(field.number as u32, WireType::Varint);
            writer.write_varint(*number as u32 as u64);
            Ok(())
        }
        scalar_type => {
            let wire_type = if matches!(scalar_type, FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float)
            {
                WireType::Fixed32
            } else if matches!(scalar_type, FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double) {
                WireType::Fixed64
            } else if matches!(scalar_type, FieldType::String | FieldType::Bytes) {
                WireType::LengthDelimited
            } else {
                WireType::Varint
            };
            writer.write_tag(field.number as u32, wire_type);
            encode_scalar_value(writer, field, scalar_type, value)
        }
    }
}

fn encode_scalar_value(
    writer: &mut Writer,
    field: &FieldDescriptor,
    field_type: FieldType,
    value: &Value,
) -> EncodeResult<()> {
    use FieldType::*;
    match field_type {
        Double => writer.write_double(value_as_f64(value).ok_or_else(|| type_mismatch(field, "double"))?),
        Float => writer.write_float(value_as_f64(value).ok_or_else(|| type_mismatch(field, "float"))? as f32),
        Int64 => writer.write_varint(value_as_i64(value).ok_or_else(|| type_mismatch(field, "int64"))? as u64),
        Uint64 => writer.write_varint(value_as_u64(value).ok_or_else(|| type_mismatch(field, "uint64"))?),
        Int32 => writer.write_varint(value_as_i64(value).ok_or_else(|| type_mismatch(field, "int32"))? as i32 as i64 as u64),
        Fixed64 => writer.write_fixed64(value_as_u64(value).ok_or_else(|| type_mismatch(field, "fixed64"))?),
        Fixed32 => writer.write_fixed32(value_as_u64(value).ok_or_else(|| type_mismatch(field, "fixed32"))? as u32),
        Bool => writer.write_varint(value_as_bool(value).ok_or_else(|| type_mismatch(field, "bool"))? as u64),
        String => writer.write_length_delimited(
            value_as_string(value).ok_or_else(|| type_mismatch(field, "string"))?.as_bytes(),
        ),
        Bytes => writer.write_length_delimited(value_as_bytes(value).ok_or_else(|| type_mismatch(field, "bytes"))?),
        Uint32 => writer.write_varint(value_as_u64(value).ok_or_else(|| type_mismatch(field, "uint32"))? as u32 as u64),
        Sfixed32 => writer.write_fixed32(value_as_i64(value).ok_or_else(|| type_mismatch(field, "sfixed32"))? as i32 as u32),
        Sfixed64 => writer.write_fixed64(value_as_i64(value).ok_or_else(|| type_mismatch(field, "sfixed64"))? as i64 as u64),
        Sint32 => writer.write_sint32(value_as_i64(value).ok_or_else(|| type_mismatch(field, "sint32"))? as i32),
        Sint64 => writer.write_sint64(value_as_i64(value).ok_or_else(|| type_mismatch(field, "sint64"))?),
        Group | Message | Enum => return Err(type_mismatch(field, "scalar")),
    }
    Ok(())
}

fn type_mismatch(field: &FieldDescriptor, expected: &str) -> EncodeError {
    EncodeError::TypeMismatch {
        field: field.name.clone(),
        expected: expected.to_string(),
    }
}

fn map_key_to_value(key: &MapKey) -> Value {
    match key {
        MapKey::Bool(b) => Value::Bool(*b),
        MapKey::Int(n) => Value::Int(*n),
        MapKey::UInt(n) => Value::UInt(*n),
        MapKey::String(s) => Value::String(s.clone()),
    }
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::UInt(n) => i64::try_from(*n).ok(),
        Value::BigInt(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::UInt(n) => Some(*n),
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::BigInt(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Double(n) => Some(*n),
        Value::Float(n) => Some(*n as f64),
        Value::Int(n) => Some(*n as f64),
        Value::UInt(n) => Some(*n as f64),
        _ => None,
    }
}

fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn value_as_string(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn value_as_bytes(v: &Value) -> Option<&[u8]> {
    match v {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptorData, FileDescriptorProtoData, MessageDescriptorData};

    fn registry_with_simple() -> Registry {
        let file = FileDescriptorProtoData {
            name: "test.proto".to_string(),
            package: "test".to_string(),
            dependencies: vec![],
            messages: vec![MessageDescriptorData {
                name: "Simple".to_string(),
                fields: vec![
                    FieldDescriptorData {
                        name: "id".to_string(),
                        number: 1,
                        label: FieldLabel::Optional,
                        field_type: Some(FieldType::Int32),
                        type_name: None,
                    },
                    FieldDescriptorData {
                        name: "name".to_string(),
                        number: 2,
                        label: FieldLabel::Optional,
                        field_type: Some(FieldType::String),
                        type_name: None,
                    },
                    FieldDescriptorData {
                        name: "tags".to_string(),
                        number: 3,
                        label: FieldLabel::Repeated,
                        field_type: Some(FieldType::String),
                        type_name: None,
                    },
                ],
                nested_messages: vec![],
                nested_enums: vec![],
            }],
            enums: vec![],
            services: vec![],
        };
        let mut registry = Registry::new();
        registry.register_descriptor_set(vec![file]);
        registry
    }

    fn encode_raw_simple(id: i32, name: &str, tags: &[&str]) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_tag(1, WireType::Varint);
        w.write_varint(id as u32 as u64);
        w.write_tag(2, WireType::LengthDelimited);
        w.write_length_delimited(name.as_bytes());
        for t in tags {
            w.write_tag(3, WireType::LengthDelimited);
            w.write_length_delimited(t.as_bytes());
        }
        w.into_vec()
    }

    #[test]
    fn decodes_known_message() {
        let registry = registry_with_simple();
        let bytes = encode_raw_simple(7, "hello", &["a", "b"]);
        let value = decode(&registry, Some("test.Simple"), &bytes, &DecodeOptions::default());
        let Value::Message(msg) = value else { panic!("expected message") };
        assert_eq!(msg.get("id"), Some(&Value::Int(7)));
        assert_eq!(msg.get("name"), Some(&Value::String("hello".to_string())));
        assert_eq!(
            msg.get("tags"),
            Some(&Value::Repeated(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string())
            ]))
        );
    }

    #[test]
    fn blind_decode_falls_back_without_schema() {
        let registry = registry_with_simple();
        let bytes = encode_raw_simple(7, "hello", &[]);
        let value = decode(&registry, None, &bytes, &DecodeOptions::default());
        let Value::Message(msg) = value else { panic!("expected message") };
        assert!(msg.get("id").is_none());
        assert_eq!(msg.len(), 2);
    }

    #[test]
    fn encode_then_decode_round_trip() {
        let registry = registry_with_simple();
        let mut msg = MessageValue::new(Some("test.Simple".to_string()));
        msg.insert_named("id", Value::Int(42));
        msg.insert_named("name", Value::String("round-trip".to_string()));
        msg.insert_named(
            "tags",
            Value::Repeated(vec![Value::String("x".to_string())]),
        );

        let bytes = encode(&registry, "test.Simple", &Value::Message(msg)).unwrap();
        let decoded = decode(&registry, Some("test.Simple"), &bytes, &DecodeOptions::default());
        let Value::Message(decoded) = decoded else { panic!("expected message") };
        assert_eq!(decoded.get("id"), Some(&Value::Int(42)));
        assert_eq!(
            decoded.get("name"),
            Some(&Value::String("round-trip".to_string()))
        );
    }

    #[test]
    fn encode_missing_schema_fails() {
        let registry = registry_with_simple();
        let result = encode(&registry, "test.DoesNotExist", &Value::Message(MessageValue::new(None)));
        assert!(matches!(result, Err(EncodeError::SchemaMissing(_))));
    }

    #[test]
    fn template_has_every_declared_field() {
        let registry = registry_with_simple();
        let value = template(&registry, "test.Simple").unwrap();
        let Value::Message(msg) = value else { panic!("expected message") };
        assert_eq!(msg.get("id"), Some(&Value::Int(0)));
        assert_eq!(msg.get("name"), Some(&Value::String(String::new())));
        assert_eq!(msg.get("tags"), Some(&Value::Repeated(Vec::new())));
    }

    #[test]
    fn invalid_utf8_falls_back_to_bytes_by_default() {
        let registry = registry_with_simple();
        let mut w = Writer::new();
        w.write_tag(2, WireType::LengthDelimited);
        w.write_length_delimited(&[0xff, 0xfe]);
        let bytes = w.into_vec();

        let value = decode(&registry, Some("test.Simple"), &bytes, &DecodeOptions::default());
        let Value::Message(msg) = value else { panic!("expected message") };
        assert_eq!(msg.get("name"), Some(&Value::Bytes(vec![0xff, 0xfe])));
    }

    #[test]
    fn unresolved_fields_synthesize_field_underscore_number_key() {
        // `08 0A` (field 1, varint, value 10) with no schema at all.
        let registry = Registry::new();
        let bytes = vec![0x08, 0x0A];
        let value = decode(&registry, None, &bytes, &DecodeOptions::default());
        let Value::Message(msg) = value else { panic!("expected message") };
        let (label, v) = msg.iter().next().unwrap();
        assert_eq!(label.to_string(), "field_1");
        assert_eq!(v, &Value::Int(10));
    }

    #[test]
    fn unknown_group_field_on_a_known_message_yields_error_not_silent_drop() {
        let registry = registry_with_simple();
        let mut w = Writer::new();
        // Field 99 isn't declared on test.Simple; tag it as a group, which
        // this codec can't decode.
        w.write_tag(99, WireType::StartGroup);
        let bytes = w.into_vec();

        let value = decode(&registry, Some("test.Simple"), &bytes, &DecodeOptions::default());
        let Value::Message(msg) = value else { panic!("expected message") };
        let (label, v) = msg.iter().next().unwrap();
        assert_eq!(label.to_string(), "field_99");
        assert!(v.is_error());
    }

    #[test]
    fn strict_utf8_reports_error() {
        let registry = registry_with_simple();
        let mut w = Writer::new();
        w.write_tag(2, WireType::LengthDelimited);
        w.write_length_delimited(&[0xff, 0xfe]);
        let bytes = w.into_vec();

        let opts = DecodeOptions {
            strict_utf8: true,
            ..DecodeOptions::default()
        };
        let value = decode(&registry, Some("test.Simple"), &bytes, &opts);
        let Value::Message(msg) = value else { panic!("expected message") };
        assert!(msg.get("name").unwrap().is_error());
    }
}
