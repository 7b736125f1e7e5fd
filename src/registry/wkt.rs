//! Built-in `google/protobuf/*.proto` well-known-type descriptors.
//!
//! These are constructed directly as [`FileDescriptorProtoData`] rather than
//! round-tripped through the wire parser: the registry consumes that shape
//! either way, and there is no wire-format fidelity gained by serializing
//! and immediately re-parsing bytes we wrote ourselves.
//!
//! Only the handful of message/enum shapes this engine's codec actually
//! needs are modelled. `descriptor.proto` in particular is a stub: a real
//! dependency on it (a server shipping custom options) is vanishingly rare
//! for the RPCs this engine inspects, and modelling its full self-describing
//! shape buys nothing here.

use crate::descriptor::{
    EnumDescriptorData, EnumValueData, FieldDescriptorData, FieldLabel, FieldType,
    FileDescriptorProtoData, MessageDescriptorData,
};

fn field(
    name: &str,
    number: i32,
    label: FieldLabel,
    field_type: FieldType,
    type_name: Option<&str>,
) -> FieldDescriptorData {
    FieldDescriptorData {
        name: name.to_string(),
        number,
        label,
        field_type: Some(field_type),
        type_name: type_name.map(str::to_string),
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorData>) -> MessageDescriptorData {
    MessageDescriptorData {
        name: name.to_string(),
        fields,
        nested_messages: Vec::new(),
        nested_enums: Vec::new(),
    }
}

fn file(name: &str, messages: Vec<MessageDescriptorData>) -> FileDescriptorProtoData {
    FileDescriptorProtoData {
        name: name.to_string(),
        package: "google.protobuf".to_string(),
        dependencies: Vec::new(),
        messages,
        enums: Vec::new(),
        services: Vec::new(),
    }
}

fn timestamp_file() -> FileDescriptorProtoData {
    file(
        "google/protobuf/timestamp.proto",
        vec![message(
            "Timestamp",
            vec![
                field("seconds", 1, FieldLabel::Optional, FieldType::Int64, None),
                field("nanos", 2, FieldLabel::Optional, FieldType::Int32, None),
            ],
        )],
    )
}

fn duration_file() -> FileDescriptorProtoData {
    file(
        "google/protobuf/duration.proto",
        vec![message(
            "Duration",
            vec![
                field("seconds", 1, FieldLabel::Optional, FieldType::Int64, None),
                field("nanos", 2, FieldLabel::Optional, FieldType::Int32, None),
            ],
        )],
    )
}

fn empty_file() -> FileDescriptorProtoData {
    file("google/protobuf/empty.proto", vec![message("Empty", vec![])])
}

fn any_file() -> FileDescriptorProtoData {
    file(
        "google/protobuf/any.proto",
        vec![message(
            "Any",
            vec![
                field("type_url", 1, FieldLabel::Optional, FieldType::String, None),
                field("value", 2, FieldLabel::Optional, FieldType::Bytes, None),
            ],
        )],
    )
}

fn field_mask_file() -> FileDescriptorProtoData {
    file(
        "google/protobuf/field_mask.proto",
        vec![message(
            "FieldMask",
            vec![field(
                "paths",
                1,
                FieldLabel::Repeated,
                FieldType::String,
                None,
            )],
        )],
    )
}

fn wrappers_file() -> FileDescriptorProtoData {
    let wrapper = |name: &str, field_type: FieldType| {
        message(
            name,
            vec![field("value", 1, FieldLabel::Optional, field_type, None)],
        )
    };

    file(
        "google/protobuf/wrappers.proto",
        vec![
            wrapper("DoubleValue", FieldType::Double),
            wrapper("FloatValue", FieldType::Float),
            wrapper("Int64Value", FieldType::Int64),
            wrapper("UInt64Value", FieldType::Uint64),
            wrapper("Int32Value", FieldType::Int32),
            wrapper("UInt32Value", FieldType::Uint32),
            wrapper("BoolValue", FieldType::Bool),
            wrapper("StringValue", FieldType::String),
            wrapper("BytesValue", FieldType::Bytes),
        ],
    )
}

fn struct_file() -> FileDescriptorProtoData {
    let fields_entry = message(
        "FieldsEntry",
        vec![
            field("key", 1, FieldLabel::Optional, FieldType::String, None),
            field(
                "value",
                2,
                FieldLabel::Optional,
                FieldType::Message,
                Some("google.protobuf.Value"),
            ),
        ],
    );

    let mut struct_msg = message(
        "Struct",
        vec![field(
            "fields",
            1,
            FieldLabel::Repeated,
            FieldType::Message,
            Some("google.protobuf.Struct.FieldsEntry"),
        )],
    );
    struct_msg.nested_messages.push(fields_entry);

    let value_msg = message(
        "Value",
        vec![
            field(
                "null_value",
                1,
                FieldLabel::Optional,
                FieldType::Enum,
                Some("google.protobuf.NullValue"),
            ),
            field(
                "number_value",
                2,
                FieldLabel::Optional,
                FieldType::Double,
                None,
            ),
            field(
                "string_value",
                3,
                FieldLabel::Optional,
                FieldType::String,
                None,
            ),
            field("bool_value", 4, FieldLabel::Optional, FieldType::Bool, None),
            field(
                "struct_value",
                5,
                FieldLabel::Optional,
                FieldType::Message,
                Some("google.protobuf.Struct"),
            ),
            field(
                "list_value",
                6,
                FieldLabel::Optional,
                FieldType::Message,
                Some("google.protobuf.ListValue"),
            ),
        ],
    );

    let list_value_msg = message(
        "ListValue",
        vec![field(
            "values",
            1,
            FieldLabel::Repeated,
            FieldType::Message,
            Some("google.protobuf.Value"),
        )],
    );

    let mut f = file(
        "google/protobuf/struct.proto",
        vec![struct_msg, value_msg, list_value_msg],
    );
    f.enums.push(EnumDescriptorData {
        name: "NullValue".to_string(),
        values: vec![EnumValueData {
            name: "NULL_VALUE".to_string(),
            number: 0,
        }],
    });
    f
}

fn descriptor_file() -> FileDescriptorProtoData {
    file("google/protobuf/descriptor.proto", Vec::new())
}

/// All well-known-type files this engine knows how to synthesize, keyed by
/// the dependency path a `.proto` file would name.
pub fn all() -> Vec<FileDescriptorProtoData> {
    vec![
        descriptor_file(),
        empty_file(),
        timestamp_file(),
        duration_file(),
        any_file(),
        struct_file(),
        wrappers_file(),
        field_mask_file(),
    ]
}
