//! Covers shapes the codec's own unit tests don't: nested messages, enums,
//! and structurally-detected map fields, end to end through
//! `decode`/`encode`/`template`.

use grpc_trace_core::codec::{decode, encode, template, DecodeOptions};
use grpc_trace_core::descriptor::{
    EnumDescriptorData, EnumValueData, FieldDescriptorData, FieldLabel, FieldType,
    FileDescriptorProtoData, MessageDescriptorData,
};
use grpc_trace_core::registry::Registry;
use grpc_trace_core::value::{MapKey, MessageValue, Value};
use grpc_trace_core::wire::{WireType, Writer};

fn registry_with_order() -> Registry {
    let tags_entry = MessageDescriptorData {
        name: "TagsEntry".to_string(),
        fields: vec![
            FieldDescriptorData {
                name: "key".to_string(),
                number: 1,
                label: FieldLabel::Optional,
                field_type: Some(FieldType::String),
                type_name: None,
            },
            FieldDescriptorData {
                name: "value".to_string(),
                number: 2,
                label: FieldLabel::Optional,
                field_type: Some(FieldType::String),
                type_name: None,
            },
        ],
        nested_messages: vec![],
        nested_enums: vec![],
    };

    let address = MessageDescriptorData {
        name: "Address".to_string(),
        fields: vec![FieldDescriptorData {
            name: "city".to_string(),
            number: 1,
            label: FieldLabel::Optional,
            field_type: Some(FieldType::String),
            type_name: None,
        }],
        nested_messages: vec![],
        nested_enums: vec![],
    };

    let mut order = MessageDescriptorData {
        name: "Order".to_string(),
        fields: vec![
            FieldDescriptorData {
                name: "status".to_string(),
                number: 1,
                label: FieldLabel::Optional,
                field_type: Some(FieldType::Enum),
                type_name: Some("shop.Order.Status".to_string()),
            },
            FieldDescriptorData {
                name: "ship_to".to_string(),
                number: 2,
                label: FieldLabel::Optional,
                field_type: Some(FieldType::Message),
                type_name: Some("shop.Address".to_string()),
            },
            FieldDescriptorData {
                name: "tags".to_string(),
                number: 3,
                label: FieldLabel::Repeated,
                field_type: Some(FieldType::Message),
                type_name: Some("shop.Order.TagsEntry".to_string()),
            },
        ],
        nested_messages: vec![tags_entry],
        nested_enums: vec![EnumDescriptorData {
            name: "Status".to_string(),
            values: vec![
                EnumValueData { name: "PENDING".to_string(), number: 0 },
                EnumValueData { name: "SHIPPED".to_string(), number: 1 },
            ],
        }],
    };
    // keep clippy-style field order stable regardless of construction order above
    order.fields.sort_by_key(|f| f.number);

    let file = FileDescriptorProtoData {
        name: "shop.proto".to_string(),
        package: "shop".to_string(),
        dependencies: vec![],
        messages: vec![address, order],
        enums: vec![],
        services: vec![],
    };

    let mut registry = Registry::new();
    registry.register_descriptor_set(vec![file]);
    registry
}

#[test]
fn decodes_nested_message_enum_and_map_field() {
    let registry = registry_with_order();

    let mut entry = Writer::new();
    entry.write_tag(1, WireType::LengthDelimited);
    entry.write_length_delimited(b"priority");
    entry.write_tag(2, WireType::LengthDelimited);
    entry.write_length_delimited(b"high");

    let mut address = Writer::new();
    address.write_tag(1, WireType::LengthDelimited);
    address.write_length_delimited(b"Springfield");

    let mut order = Writer::new();
    order.write_tag(1, WireType::Varint);
    order.write_varint(1); // SHIPPED
    order.write_tag(2, WireType::LengthDelimited);
    order.write_length_delimited(&address.into_vec());
    order.write_tag(3, WireType::LengthDelimited);
    order.write_length_delimited(&entry.into_vec());

    let value = decode(&registry, Some("shop.Order"), &order.into_vec(), &DecodeOptions::default());
    let Value::Message(msg) = value else { panic!("expected message") };

    assert_eq!(
        msg.get("status"),
        Some(&Value::Enum { number: 1, name: Some("SHIPPED".to_string()) })
    );

    let Some(Value::Message(address)) = msg.get("ship_to") else { panic!("expected nested message") };
    assert_eq!(address.get("city"), Some(&Value::String("Springfield".to_string())));

    let Some(Value::Map(entries)) = msg.get("tags") else { panic!("expected map") };
    assert_eq!(entries, &vec![(MapKey::String("priority".to_string()), Value::String("high".to_string()))]);
}

#[test]
fn encodes_map_and_enum_fields_that_then_decode_back() {
    let registry = registry_with_order();

    let mut msg = MessageValue::new(Some("shop.Order".to_string()));
    msg.insert_named("status", Value::Enum { number: 0, name: None });
    let mut address = MessageValue::new(Some("shop.Address".to_string()));
    address.insert_named("city", Value::String("Gotham".to_string()));
    msg.insert_named("ship_to", Value::Message(address));
    msg.insert_named(
        "tags",
        Value::Map(vec![(MapKey::String("rush".to_string()), Value::String("yes".to_string()))]),
    );

    let bytes = encode(&registry, "shop.Order", &Value::Message(msg)).unwrap();
    let decoded = decode(&registry, Some("shop.Order"), &bytes, &DecodeOptions::default());
    let Value::Message(decoded) = decoded else { panic!("expected message") };

    assert_eq!(
        decoded.get("status"),
        Some(&Value::Enum { number: 0, name: Some("PENDING".to_string()) })
    );
    let Some(Value::Map(entries)) = decoded.get("tags") else { panic!("expected map") };
    assert_eq!(entries.len(), 1);
}

#[test]
fn template_seeds_nested_message_and_map_defaults() {
    let registry = registry_with_order();
    let value = template(&registry, "shop.Order").unwrap();
    let Value::Message(msg) = value else { panic!("expected message") };

    assert_eq!(msg.get("tags"), Some(&Value::Map(Vec::new())));
    let Some(Value::Message(address)) = msg.get("ship_to") else { panic!("expected nested message template") };
    assert_eq!(address.get("city"), Some(&Value::String(String::new())));
}
