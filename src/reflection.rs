//! Drives the gRPC Server Reflection protocol over plain HTTP requests and
//! coalesces concurrent callers per origin.
//!
//! The reflection channel is single-shot request/response rather than a
//! long-lived streaming connection, so requests are framed by hand exactly
//! like any other gRPC-Web call this crate inspects.

use crate::descriptor::{self, FileDescriptorProtoData};
use crate::registry::Registry;
use crate::wire::{Reader, Writer, WireType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Error, Clone)]
pub enum ReflectionError {
    #[error("transport error contacting reflection endpoint: {0}")]
    Transport(String),
    #[error("server reflection error (code={code}): {message}")]
    Server { code: i32, message: String },
    #[error("reflection request timed out")]
    Timeout,
}

pub type ReflectionOutcome = Result<(), ReflectionError>;

#[derive(Debug, Clone)]
pub struct ReflectionConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(10_000),
        }
    }
}

const REFLECTION_PROTOCOLS: [&str; 2] = [
    "grpc.reflection.v1.ServerReflection",
    "grpc.reflection.v1alpha.ServerReflection",
];

enum OriginState {
    InFlight(watch::Receiver<Option<Arc<ReflectionOutcome>>>),
    Done(Arc<ReflectionOutcome>),
}

/// Coalesces reflection fetches per origin and registers the resulting
/// descriptors into a shared [`Registry`].
pub struct ReflectionCoordinator {
    registry: Arc<Mutex<Registry>>,
    client: reqwest::Client,
    config: ReflectionConfig,
    states: Mutex<HashMap<String, OriginState>>,
}

impl ReflectionCoordinator {
    pub fn new(registry: Arc<Mutex<Registry>>, config: ReflectionConfig) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures reflection has been attempted (at most once) for `origin`.
    /// Concurrent callers for the same origin share the same in-flight
    /// fetch and observe the same outcome.
    pub async fn ensure_origin(&self, origin: &str, base_url: &str) -> Arc<ReflectionOutcome> {
        if !self.config.enabled {
            return Arc::new(Ok(()));
        }

        enum Action {
            Return(Arc<ReflectionOutcome>),
            Await(watch::Receiver<Option<Arc<ReflectionOutcome>>>),
            Own(watch::Sender<Option<Arc<ReflectionOutcome>>>),
        }

        let action = {
            let mut states = self.states.lock().await;
            match states.get(origin) {
                Some(OriginState::Done(outcome)) => Action::Return(outcome.clone()),
                Some(OriginState::InFlight(rx)) => Action::Await(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    states.insert(origin.to_string(), OriginState::InFlight(rx));
                    tracing::info!(origin, "reflection state: Unknown -> InFlight");
                    Action::Own(tx)
                }
            }
        };

        match action {
            Action::Return(outcome) => outcome,
            Action::Await(mut rx) => loop {
                if let Some(outcome) = rx.borrow().clone() {
                    return outcome;
                }
                if rx.changed().await.is_err() {
                    return Arc::new(Err(ReflectionError::Transport(
                        "coalescing channel closed before a result was published".to_string(),
                    )));
                }
            },
            Action::Own(tx) => {
                let result = tokio::time::timeout(
                    self.config.timeout,
                    self.fetch_and_register(origin, base_url),
                )
                .await;
                let outcome = Arc::new(result.unwrap_or(Err(ReflectionError::Timeout)));

                {
                    let mut states = self.states.lock().await;
                    states.insert(origin.to_string(), OriginState::Done(outcome.clone()));
                }
                tracing::info!(
                    origin,
                    ready = outcome.is_ok(),
                    "reflection state: InFlight -> {}",
                    if outcome.is_ok() { "Ready" } else { "Failed" }
                );
                let _ = tx.send(Some(outcome.clone()));
                outcome
            }
        }
    }

    pub async fn is_ready(&self, origin: &str) -> bool {
        matches!(
            self.states.lock().await.get(origin),
            Some(OriginState::Done(outcome)) if outcome.is_ok()
        )
    }

    async fn fetch_and_register(&self, origin: &str, base_url: &str) -> ReflectionOutcome {
        tracing::debug!(origin, "starting reflection fetch");
        let mut last_transport_error = None;
        for protocol in REFLECTION_PROTOCOLS {
            match self.fetch_via_protocol(origin, base_url, protocol).await {
                Ok(files) => {
                    let file_count = files.len();
                    self.registry.lock().await.register_descriptor_set(files);
                    tracing::info!(origin, protocol, file_count, "reflection succeeded");
                    return Ok(());
                }
                Err(ReflectionError::Transport(message)) => {
                    tracing::debug!(origin, protocol, %message, "reflection protocol attempt failed, trying next");
                    last_transport_error = Some(ReflectionError::Transport(message));
                    continue;
                }
                Err(other) => {
                    tracing::warn!(origin, protocol, error = %other, "reflection failed");
                    return Err(other);
                }
            }
        }
        let error = last_transport_error.unwrap_or(ReflectionError::Transport(
            "no reflection protocol variant succeeded".to_string(),
        ));
        tracing::warn!(origin, error = %error, "reflection exhausted all protocol variants");
        Err(error)
    }

    async fn fetch_via_protocol(
        &self,
        origin: &str,
        base_url: &str,
        protocol: &str,
    ) -> Result<Vec<FileDescriptorProtoData>, ReflectionError> {
        let services = self.list_services(origin, base_url, protocol).await?;
        let mut files: HashMap<String, FileDescriptorProtoData> = HashMap::new();
        let mut seen_files = HashSet::new();
        let mut pending_files = Vec::new();

        for service in &services {
            if service.contains("ServerReflection") {
                continue;
            }
            let service_files = self
                .file_containing_symbol(origin, base_url, protocol, service)
                .await?;
            for file in service_files {
                if seen_files.insert(file.name.clone()) {
                    pending_files.extend(file.dependencies.iter().cloned());
                    files.insert(file.name.clone(), file);
                }
            }
        }

        while let Some(dep) = pending_files.pop() {
            if files.contains_key(&dep) || !seen_files.insert(dep.clone()) {
                continue;
            }
            match self.file_by_filename(origin, base_url, protocol, &dep).await {
                Ok(dep_files) => {
                    for file in dep_files {
                        if files.contains_key(&file.name) {
                            continue;
                        }
                        pending_files.extend(file.dependencies.iter().cloned());
                        files.insert(file.name.clone(), file);
                    }
                }
                Err(_) => continue, // dependency fetch failure is tolerated; partial registry is fine
            }
        }

        Ok(files.into_values().collect())
    }

    async fn list_services(
        &self,
        origin: &str,
        base_url: &str,
        protocol: &str,
    ) -> Result<Vec<String>, ReflectionError> {
        let request = encode_request(origin, Request::ListServices);
        let response = self.call(base_url, protocol, request).await?;
        match response {
            Response::ListServices(names) => Ok(names),
            Response::Error { code, message } => Err(ReflectionError::Server { code, message }),
            _ => Err(ReflectionError::Transport(
                "unexpected response shape for ListServices".to_string(),
            )),
        }
    }

    async fn file_containing_symbol(
        &self,
        origin: &str,
        base_url: &str,
        protocol: &str,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProtoData>, ReflectionError> {
        let request = encode_request(origin, Request::FileContainingSymbol(symbol));
        self.file_response(base_url, protocol, request).await
    }

    async fn file_by_filename(
        &self,
        origin: &str,
        base_url: &str,
        protocol: &str,
        filename: &str,
    ) -> Result<Vec<FileDescriptorProtoData>, ReflectionError> {
        let request = encode_request(origin, Request::FileByFilename(filename));
        self.file_response(base_url, protocol, request).await
    }

    async fn file_response(
        &self,
        base_url: &str,
        protocol: &str,
        request: Vec<u8>,
    ) -> Result<Vec<FileDescriptorProtoData>, ReflectionError> {
        let response = self.call(base_url, protocol, request).await?;
        match response {
            Response::FileDescriptors(raw_files) => raw_files
                .iter()
                .map(|bytes| {
                    descriptor::parse_file_descriptor_proto(bytes)
                        .map_err(|e| ReflectionError::Transport(e.to_string()))
                })
                .collect(),
            Response::Error { code, message } => Err(ReflectionError::Server { code, message }),
            _ => Err(ReflectionError::Transport(
                "unexpected response shape for a file lookup".to_string(),
            )),
        }
    }

    async fn call(
        &self,
        base_url: &str,
        protocol: &str,
        body: Vec<u8>,
    ) -> Result<Response, ReflectionError> {
        let url = format!("{base_url}/{protocol}/ServerReflectionInfo");
        let framed = frame_single(&body);

        let response = self
            .client
            .post(url)
            .header("content-type", "application/grpc-web+proto")
            .header("x-grpc-web", "1")
            .body(framed)
            .send()
            .await
            .map_err(|e| ReflectionError::Transport(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ReflectionError::Transport(e.to_string()))?;

        let Some(payload) = first_data_frame(&bytes) else {
            return Err(ReflectionError::Transport(
                "response had no gRPC-Web data frame".to_string(),
            ));
        };

        decode_response(payload).map_err(ReflectionError::Transport)
    }
}

fn frame_single(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(0);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn first_data_frame(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 5 {
        return None;
    }
    let flags = bytes[0];
    let length = u32::from_be_bytes(bytes[1..5].try_into().ok()?) as usize;
    let body = bytes.get(5..5 + length)?;
    if flags & 0x80 != 0 {
        None
    } else {
        Some(body)
    }
}

enum Request<'a> {
    ListServices,
    FileContainingSymbol(&'a str),
    FileByFilename(&'a str),
}

/// Encodes a `ServerReflectionRequest`. Field numbers:
/// host=1, file_by_filename=3, file_containing_symbol=4, list_services=7.
fn encode_request(host: &str, request: Request) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_tag(1, WireType::LengthDelimited);
    w.write_length_delimited(host.as_bytes());

    match request {
        Request::FileByFilename(name) => {
            w.write_tag(3, WireType::LengthDelimited);
            w.write_length_delimited(name.as_bytes());
        }
        Request::FileContainingSymbol(symbol) => {
            w.write_tag(4, WireType::LengthDelimited);
            w.write_length_delimited(symbol.as_bytes());
        }
        Request::ListServices => {
            w.write_tag(7, WireType::LengthDelimited);
            w.write_length_delimited(b"");
        }
    }

    w.into_vec()
}

enum Response {
    FileDescriptors(Vec<Vec<u8>>),
    ListServices(Vec<String>),
    Error { code: i32, message: String },
}

/// Decodes a `ServerReflectionResponse`. Field numbers:
/// file_descriptor_response=4 (file_descriptor_proto=1 repeated bytes),
/// list_services_response=6 (service=1, each with name=1),
/// error_response=7 (error_code=1, error_message=2).
fn decode_response(bytes: &[u8]) -> Result<Response, String> {
    let mut reader = Reader::new(bytes);
    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag().map_err(|e| e.to_string())?;
        match field_number {
            4 => {
                let inner = reader.read_length_delimited().map_err(|e| e.to_string())?;
                return Ok(Response::FileDescriptors(parse_file_descriptor_response(inner)?));
            }
            6 => {
                let inner = reader.read_length_delimited().map_err(|e| e.to_string())?;
                return Ok(Response::ListServices(parse_list_services_response(inner)?));
            }
            7 => {
                let inner = reader.read_length_delimited().map_err(|e| e.to_string())?;
                let (code, message) = parse_error_response(inner)?;
                return Ok(Response::Error { code, message });
            }
            _ => reader.skip_field(wire_type).map_err(|e| e.to_string())?,
        }
    }
    Err("response had none of the expected payload fields".to_string())
}

fn parse_file_descriptor_response(bytes: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut reader = Reader::new(bytes);
    let mut files = Vec::new();
    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag().map_err(|e| e.to_string())?;
        if field_number == 1 {
            files.push(
                reader
                    .read_length_delimited()
                    .map_err(|e| e.to_string())?
                    .to_vec(),
            );
        } else {
            reader.skip_field(wire_type).map_err(|e| e.to_string())?;
        }
    }
    Ok(files)
}

fn parse_list_services_response(bytes: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = Reader::new(bytes);
    let mut names = Vec::new();
    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag().map_err(|e| e.to_string())?;
        if field_number == 1 {
            let service_bytes = reader.read_length_delimited().map_err(|e| e.to_string())?;
            names.push(parse_service_response_name(service_bytes)?);
        } else {
            reader.skip_field(wire_type).map_err(|e| e.to_string())?;
        }
    }
    Ok(names)
}

fn parse_service_response_name(bytes: &[u8]) -> Result<String, String> {
    let mut reader = Reader::new(bytes);
    let mut name = String::new();
    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag().map_err(|e| e.to_string())?;
        if field_number == 1 {
            let raw = reader.read_length_delimited().map_err(|e| e.to_string())?;
            name = String::from_utf8_lossy(raw).into_owned();
        } else {
            reader.skip_field(wire_type).map_err(|e| e.to_string())?;
        }
    }
    Ok(name)
}

fn parse_error_response(bytes: &[u8]) -> Result<(i32, String), String> {
    let mut reader = Reader::new(bytes);
    let mut code = 0;
    let mut message = String::new();
    while !reader.is_empty() {
        let (field_number, wire_type) = reader.read_tag().map_err(|e| e.to_string())?;
        match field_number {
            1 => code = reader.read_varint().map_err(|e| e.to_string())? as i32,
            2 => {
                let raw = reader.read_length_delimited().map_err(|e| e.to_string())?;
                message = String::from_utf8_lossy(raw).into_owned();
            }
            _ => reader.skip_field(wire_type).map_err(|e| e.to_string())?,
        }
    }
    Ok((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_list_services_request_with_host() {
        let bytes = encode_request("example.com", Request::ListServices);
        let mut reader = Reader::new(&bytes);
        let (field, _) = reader.read_tag().unwrap();
        assert_eq!(field, 1);
        assert_eq!(reader.read_length_delimited().unwrap(), b"example.com");
        let (field, _) = reader.read_tag().unwrap();
        assert_eq!(field, 7);
    }

    #[test]
    fn decodes_list_services_response() {
        let mut service = Writer::new();
        service.write_tag(1, WireType::LengthDelimited);
        service.write_length_delimited(b"pkg.Greeter");

        let mut body = Writer::new();
        body.write_tag(6, WireType::LengthDelimited);
        body.write_length_delimited(&{
            let mut inner = Writer::new();
            inner.write_tag(1, WireType::LengthDelimited);
            inner.write_length_delimited(&service.into_vec());
            inner.into_vec()
        });

        let response = decode_response(&body.into_vec()).unwrap();
        match response {
            Response::ListServices(names) => assert_eq!(names, vec!["pkg.Greeter".to_string()]),
            _ => panic!("expected ListServices response"),
        }
    }

    #[test]
    fn decodes_error_response() {
        let mut inner = Writer::new();
        inner.write_tag(1, WireType::Varint);
        inner.write_varint(5);
        inner.write_tag(2, WireType::LengthDelimited);
        inner.write_length_delimited(b"not found");

        let mut body = Writer::new();
        body.write_tag(7, WireType::LengthDelimited);
        body.write_length_delimited(&inner.into_vec());

        let response = decode_response(&body.into_vec()).unwrap();
        match response {
            Response::Error { code, message } => {
                assert_eq!(code, 5);
                assert_eq!(message, "not found");
            }
            _ => panic!("expected Error response"),
        }
    }

    #[test]
    fn first_data_frame_rejects_trailer_only_response() {
        let mut trailer = vec![0x80u8];
        trailer.extend_from_slice(&0u32.to_be_bytes());
        assert!(first_data_frame(&trailer).is_none());
    }

    #[tokio::test]
    async fn coalesces_concurrent_ensure_origin_calls_when_disabled() {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let coordinator = Arc::new(ReflectionCoordinator::new(
            registry,
            ReflectionConfig {
                enabled: false,
                ..ReflectionConfig::default()
            },
        ));

        let a = coordinator.clone();
        let b = coordinator.clone();
        let (ra, rb) = tokio::join!(
            a.ensure_origin("origin-a", "https://example.com"),
            b.ensure_origin("origin-a", "https://example.com"),
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }
}
