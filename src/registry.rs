//! Holds files/messages/enums/services, resolves names, topologically
//! orders files by dependency, and injects well-known types.

pub mod wkt;

use crate::descriptor::{
    self, DescriptorParseError, EnumDescriptorData, FieldLabel, FieldType, FileDescriptorProtoData,
    MessageDescriptorData,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse descriptor bytes: {0}")]
    Parse(#[from] DescriptorParseError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub label: FieldLabel,
    pub field_type: Option<FieldType>,
    /// Fully-qualified dotted name; set iff `field_type` is Message/Group/Enum.
    pub type_name: Option<String>,
    /// proto3 packable scalars default to packed; this engine does not parse
    /// the `packed` field option explicitly, so it follows the proto3
    /// default for any repeated packable scalar.
    pub packed: bool,
}

impl FieldDescriptor {
    pub fn is_map_entry_candidate(&self) -> bool {
        self.label == FieldLabel::Repeated
            && self.field_type == Some(FieldType::Message)
            && self.type_name.as_deref().is_some_and(|n| n.ends_with("Entry"))
    }
}

#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub full_name: String,
    pub simple_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn field_by_number(&self, number: i32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// A message descriptor is shaped like a map entry (`key`/`value` at
    /// fields 1/2) if its name ends in `Entry` and it has exactly those two
    /// fields. The descriptor parser doesn't read the `map_entry` message
    /// option (it isn't among the fields it needs for anything else), so
    /// map fields are detected structurally instead.
    pub fn looks_like_map_entry(&self) -> bool {
        self.simple_name.ends_with("Entry")
            && self.fields.len() == 2
            && self.field_by_number(1).is_some_and(|f| f.name == "key")
            && self.field_by_number(2).is_some_and(|f| f.name == "value")
    }
}

#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub full_name: String,
    number_to_name: HashMap<i32, String>,
    name_to_number: HashMap<String, i32>,
}

impl EnumDescriptor {
    fn from_data(full_name: String, data: &EnumDescriptorData) -> Self {
        let mut number_to_name = HashMap::new();
        let mut name_to_number = HashMap::new();
        for value in &data.values {
            number_to_name
                .entry(value.number)
                .or_insert_with(|| value.name.clone());
            name_to_number.entry(value.name.clone()).or_insert(value.number);
        }
        Self {
            full_name,
            number_to_name,
            name_to_number,
        }
    }

    pub fn name_for(&self, number: i32) -> Option<&str> {
        self.number_to_name.get(&number).map(String::as_str)
    }

    pub fn number_for(&self, name: &str) -> Option<i32> {
        self.name_to_number.get(name).copied()
    }
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub path: String,
    pub service_full_name: String,
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub full_name: String,
    pub simple_name: String,
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub file_name: String,
    pub package: String,
    pub dependencies: Vec<String>,
    pub messages: Vec<String>,
    pub enums: Vec<String>,
    pub services: Vec<String>,
}

pub enum Descriptor<'a> {
    Message(&'a MessageDescriptor),
    Enum(&'a EnumDescriptor),
    Service(&'a ServiceDescriptor),
    File(&'a FileDescriptor),
}

/// Holds files/messages/enums/services and their derived indices.
///
/// Registration always rebuilds every index from the full set of source
/// files currently known to the registry, so every registration rebuilds
/// atomically from the caller's view: a
/// reader never observes a half-updated index.
#[derive(Default)]
pub struct Registry {
    source_files: HashMap<String, FileDescriptorProtoData>,
    files: Vec<FileDescriptor>,
    messages: HashMap<String, MessageDescriptor>,
    enums: HashMap<String, EnumDescriptor>,
    services: HashMap<String, ServiceDescriptor>,
    methods: HashMap<String, MethodDescriptor>,
    unresolved_fields: HashSet<(String, String)>,
    warnings: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn register_descriptor_set_bytes(&mut self, bytes: &[u8]) -> RegistryResult<()> {
        let files = descriptor::parse_file_descriptor_set(bytes)?;
        self.register_descriptor_set(files);
        Ok(())
    }

    pub fn register_file_descriptor_proto_bytes(&mut self, bytes: &[u8]) -> RegistryResult<()> {
        let file = descriptor::parse_file_descriptor_proto(bytes)?;
        self.register_descriptor_set(vec![file]);
        Ok(())
    }

    /// Registers a batch of already-parsed file descriptors, replacing any
    /// prior entry with the same file name, then rebuilds every index.
    pub fn register_descriptor_set(&mut self, files: Vec<FileDescriptorProtoData>) {
        let added = files.len();
        for file in files {
            self.source_files.insert(file.name.clone(), file);
        }
        self.inject_well_known_types();
        self.rebuild();
        tracing::debug!(
            files_added = added,
            total_files = self.files.len(),
            messages = self.messages.len(),
            warnings = self.warnings.len(),
            "registry rebuilt"
        );
        for warning in &self.warnings {
            tracing::warn!(%warning, "registry warning");
        }
    }

    fn inject_well_known_types(&mut self) {
        loop {
            let missing: Vec<String> = self
                .source_files
                .values()
                .flat_map(|f| f.dependencies.iter())
                .filter(|dep| !self.source_files.contains_key(dep.as_str()))
                .cloned()
                .collect();

            if missing.is_empty() {
                break;
            }

            let mut inserted_any = false;
            for wkt_file in wkt::all() {
                if missing.contains(&wkt_file.name) && !self.source_files.contains_key(&wkt_file.name)
                {
                    self.source_files.insert(wkt_file.name.clone(), wkt_file);
                    inserted_any = true;
                }
            }

            if !inserted_any {
                break;
            }
        }
    }

    fn rebuild(&mut self) {
        self.files.clear();
        self.messages.clear();
        self.enums.clear();
        self.services.clear();
        self.methods.clear();
        self.unresolved_fields.clear();
        self.warnings.clear();

        let order = topological_order(&self.source_files, &mut self.warnings);

        for file_name in &order {
            let Some(data) = self.source_files.get(file_name) else {
                continue;
            };
            let mut message_names = Vec::new();
            let mut enum_names = Vec::new();
            let mut service_names = Vec::new();

            for message in &data.messages {
                register_message(
                    &data.package,
                    None,
                    message,
                    &mut self.messages,
                    &mut self.enums,
                );
                message_names.push(full_name(&data.package, None, &message.name));
            }
            for e in &data.enums {
                let full = full_name(&data.package, None, &e.name);
                self.enums
                    .insert(full.clone(), EnumDescriptor::from_data(full.clone(), e));
                enum_names.push(full);
            }
            for svc in &data.services {
                let svc_full = full_name(&data.package, None, &svc.name);
                let methods = svc
                    .methods
                    .iter()
                    .map(|m| MethodDescriptor {
                        path: format!("/{}/{}", svc_full, m.name),
                        service_full_name: svc_full.clone(),
                        name: m.name.clone(),
                        input_type: m.input_type.clone(),
                        output_type: m.output_type.clone(),
                        client_streaming: m.client_streaming,
                        server_streaming: m.server_streaming,
                    })
                    .collect::<Vec<_>>();
                for method in &methods {
                    self.methods.insert(method.path.clone(), method.clone());
                }
                self.services.insert(
                    svc_full.clone(),
                    ServiceDescriptor {
                        full_name: svc_full.clone(),
                        simple_name: svc.name.clone(),
                        methods,
                    },
                );
                service_names.push(svc_full);
            }

            self.files.push(FileDescriptor {
                file_name: file_name.clone(),
                package: data.package.clone(),
                dependencies: data.dependencies.clone(),
                messages: message_names,
                enums: enum_names,
                services: service_names,
            });
        }

        self.mark_unresolved_fields();
    }

    fn mark_unresolved_fields(&mut self) {
        for message in self.messages.values() {
            for field in &message.fields {
                let Some(type_name) = &field.type_name else {
                    continue;
                };
                let resolved = match field.field_type {
                    Some(FieldType::Enum) => self.find_enum(type_name).is_some(),
                    Some(FieldType::Message) | Some(FieldType::Group) => {
                        self.find_message(type_name).is_some()
                    }
                    _ => true,
                };
                if !resolved {
                    self.unresolved_fields
                        .insert((message.full_name.clone(), field.name.clone()));
                }
            }
        }
    }

    pub fn is_field_unresolved(&self, message_full_name: &str, field_name: &str) -> bool {
        self.unresolved_fields
            .contains(&(message_full_name.to_string(), field_name.to_string()))
    }

    pub fn find_message(&self, name: &str) -> Option<&MessageDescriptor> {
        let key = resolve_name(self.messages.keys().map(String::as_str), name)?;
        self.messages.get(key)
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDescriptor> {
        let key = resolve_name(self.enums.keys().map(String::as_str), name)?;
        self.enums.get(key)
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceDescriptor> {
        let key = resolve_name(self.services.keys().map(String::as_str), name)?;
        self.services.get(key)
    }

    pub fn find_method(&self, path: &str) -> Option<&MethodDescriptor> {
        if let Some(m) = self.methods.get(path) {
            return Some(m);
        }
        let query_lower = path.to_ascii_lowercase();
        let mut candidates: Vec<&str> = self
            .methods
            .keys()
            .map(String::as_str)
            .filter(|k| k.to_ascii_lowercase().ends_with(&query_lower))
            .collect();
        candidates.sort_unstable();
        candidates.first().and_then(|k| self.methods.get(*k))
    }

    pub fn list_services(&self) -> Vec<&ServiceDescriptor> {
        let mut services: Vec<&ServiceDescriptor> = self.services.values().collect();
        services.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        services
    }

    pub fn list_files(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.file_name.as_str()).collect()
    }

    pub fn describe(&self, symbol: &str) -> Option<Descriptor<'_>> {
        if let Some(m) = self.find_message(symbol) {
            return Some(Descriptor::Message(m));
        }
        if let Some(e) = self.find_enum(symbol) {
            return Some(Descriptor::Enum(e));
        }
        if let Some(s) = self.find_service(symbol) {
            return Some(Descriptor::Service(s));
        }
        let normalized = descriptor::strip_leading_dot(symbol);
        self.files
            .iter()
            .find(|f| f.file_name == normalized)
            .map(Descriptor::File)
    }
}

fn full_name(package: &str, parent: Option<&str>, simple_name: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}.{simple_name}"),
        None if package.is_empty() => simple_name.to_string(),
        None => format!("{package}.{simple_name}"),
    }
}

fn register_message(
    package: &str,
    parent: Option<&str>,
    data: &MessageDescriptorData,
    messages: &mut HashMap<String, MessageDescriptor>,
    enums: &mut HashMap<String, EnumDescriptor>,
) {
    let full = full_name(package, parent, &data.name);

    let fields = data
        .fields
        .iter()
        .map(|f| FieldDescriptor {
            name: f.name.clone(),
            number: f.number,
            label: f.label,
            field_type: f.field_type,
            type_name: f.type_name.clone(),
            packed: f.label == FieldLabel::Repeated
                && f.field_type.is_some_and(FieldType::is_packable),
        })
        .collect();

    messages.insert(
        full.clone(),
        MessageDescriptor {
            full_name: full.clone(),
            simple_name: data.name.clone(),
            fields,
        },
    );

    for nested in &data.nested_messages {
        register_message(package, Some(&full), nested, messages, enums);
    }

    for nested_enum in &data.nested_enums {
        let enum_full = full_name(package, Some(&full), &nested_enum.name);
        enums.insert(
            enum_full.clone(),
            EnumDescriptor::from_data(enum_full, nested_enum),
        );
    }
}

/// Depth-first topological order over the dependency graph (file -> each
/// file it imports). Cycles are broken by skipping the edge that would
/// close the cycle; a warning is recorded and the cycle-closing file is
/// still registered with whatever references remain unresolved.
fn topological_order(
    files: &HashMap<String, FileDescriptorProtoData>,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    #[derive(PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order = Vec::new();

    fn visit<'a>(
        name: &'a str,
        files: &'a HashMap<String, FileDescriptorProtoData>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        match marks.get(name) {
            Some(Mark::Done) => return,
            Some(Mark::InProgress) => {
                warnings.push(format!(
                    "dependency cycle detected: skipping edge back to '{name}'"
                ));
                return;
            }
            None => {}
        }

        marks.insert(name, Mark::InProgress);

        if let Some(file) = files.get(name) {
            for dep in &file.dependencies {
                if files.contains_key(dep.as_str()) {
                    visit(dep, files, marks, order, warnings);
                }
            }
        }

        marks.insert(name, Mark::Done);
        order.push(name.to_string());
    }

    let mut names: Vec<&str> = files.keys().map(String::as_str).collect();
    names.sort_unstable();
    for name in names {
        visit(name, files, &mut marks, &mut order, warnings);
    }

    order
}

/// Deterministic multi-stage name resolution: exact, segment-bounded suffix,
/// case-insensitive segment-bounded suffix, unique-last-segment.
fn resolve_name<'a, I>(keys: I, query: &str) -> Option<&'a str>
where
    I: Iterator<Item = &'a str> + Clone,
{
    let query = descriptor::strip_leading_dot(query);

    if let Some(exact) = keys.clone().find(|k| *k == query) {
        return Some(exact);
    }

    let mut suffix_matches: Vec<&str> = keys
        .clone()
        .filter(|k| is_segment_suffix(k, query, false))
        .collect();
    if suffix_matches.len() == 1 {
        return Some(suffix_matches[0]);
    }
    if suffix_matches.len() > 1 {
        suffix_matches.sort_unstable();
        return Some(suffix_matches[0]);
    }

    let mut ci_matches: Vec<&str> = keys
        .clone()
        .filter(|k| is_segment_suffix(k, query, true))
        .collect();
    if ci_matches.len() == 1 {
        return Some(ci_matches[0]);
    }
    if ci_matches.len() > 1 {
        ci_matches.sort_unstable();
        return Some(ci_matches[0]);
    }

    let query_last = query.rsplit('.').next().unwrap_or(query);
    let mut last_segment_matches: Vec<&str> = keys
        .filter(|k| k.rsplit('.').next().unwrap_or(k) == query_last)
        .collect();
    if last_segment_matches.len() == 1 {
        return Some(last_segment_matches[0]);
    }
    last_segment_matches.sort_unstable();
    None
}

fn is_segment_suffix(full: &str, query: &str, case_insensitive: bool) -> bool {
    let full_segs: Vec<&str> = full.split('.').collect();
    let query_segs: Vec<&str> = query.split('.').collect();
    if query_segs.len() > full_segs.len() {
        return false;
    }
    let tail = &full_segs[full_segs.len() - query_segs.len()..];
    if case_insensitive {
        tail.iter()
            .zip(query_segs.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    } else {
        tail == query_segs.as_slice()
    }
}
