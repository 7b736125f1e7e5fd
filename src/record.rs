//! Correlates a captured request/response pair with a resolved schema and
//! produces an enriched record.

use crate::codec::{self, DecodeOptions};
use crate::framing::{self, FramingConfig, FramingInput};
use crate::registry::Registry;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("method path '{0}' is not a valid '/package.Service/Method' URL")]
    InvalidMethodPath(String),
}

pub type ProcessResult<T> = Result<T, ProcessError>;

/// A captured request/response pair as delivered by the capture
/// collaborator, before any decoding.
#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub id: String,
    pub method_path: String,
    pub url: String,
    pub start_time_ms: u64,
    pub duration_ms: u64,
    pub http_status: u16,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_raw: Vec<u8>,
    pub request_base64_encoded: bool,
    pub response_raw: Vec<u8>,
    pub response_base64_encoded: bool,
}

/// The same record once decoded against whatever schema was available at
/// the time. Identity and raw fields are preserved verbatim so re-decoding
/// never loses capture data.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub captured: CapturedRecord,
    pub service_full_name: String,
    pub method_name: String,
    pub decoded_request: crate::value::Value,
    pub decoded_responses: Vec<crate::value::Value>,
    pub grpc_status: Option<i32>,
    pub grpc_message: Option<String>,
    pub warnings: Vec<String>,
}

pub fn parse_method_path(method_path: &str) -> ProcessResult<(&str, &str)> {
    let trimmed = method_path.trim_start_matches('/');
    let (service, method) = trimmed
        .split_once('/')
        .ok_or_else(|| ProcessError::InvalidMethodPath(method_path.to_string()))?;
    if service.is_empty() || method.is_empty() {
        return Err(ProcessError::InvalidMethodPath(method_path.to_string()));
    }
    Ok((service, method))
}

/// Decodes one captured record against `registry`'s current state. Does
/// not itself trigger reflection — the caller (the engine) is responsible
/// for awaiting reflection before calling this when appropriate.
pub fn process(
    registry: &Registry,
    captured: CapturedRecord,
    decode_opts: &DecodeOptions,
    framing_config: &FramingConfig,
) -> ProcessResult<EnrichedRecord> {
    let (service_full_name, method_name) = parse_method_path(&captured.method_path)?;

    let method = registry.find_method(&captured.method_path);
    let input_type = method.map(|m| m.input_type.as_str());
    let output_type = method.map(|m| m.output_type.as_str());

    let mut warnings = Vec::new();

    let request_content_type = captured
        .request_headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or_default();
    let request_encoding = captured
        .request_headers
        .get("grpc-encoding")
        .map(String::as_str)
        .unwrap_or_default();
    let request_connect_encoding = captured
        .request_headers
        .get("connect-content-encoding")
        .map(String::as_str)
        .unwrap_or_default();

    let request_unwrapped = framing::unwrap(
        &FramingInput {
            raw: &captured.request_raw,
            base64_encoded: captured.request_base64_encoded,
            content_type: request_content_type,
            grpc_encoding: request_encoding,
            connect_content_encoding: request_connect_encoding,
        },
        framing_config,
    );
    warnings.extend(request_unwrapped.warnings);

    let decoded_request = request_unwrapped
        .frames
        .first()
        .map(|bytes| codec::decode(registry, input_type, bytes, decode_opts))
        .unwrap_or(crate::value::Value::Error(
            "no request payload frame to decode".to_string(),
        ));

    let response_content_type = captured
        .response_headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or_default();
    let response_encoding = captured
        .response_headers
        .get("grpc-encoding")
        .map(String::as_str)
        .unwrap_or_default();
    let response_connect_encoding = captured
        .response_headers
        .get("connect-content-encoding")
        .map(String::as_str)
        .unwrap_or_default();

    let response_unwrapped = framing::unwrap(
        &FramingInput {
            raw: &captured.response_raw,
            base64_encoded: captured.response_base64_encoded,
            content_type: response_content_type,
            grpc_encoding: response_encoding,
            connect_content_encoding: response_connect_encoding,
        },
        framing_config,
    );
    warnings.extend(response_unwrapped.warnings);

    let decoded_responses = response_unwrapped
        .frames
        .iter()
        .map(|bytes| codec::decode(registry, output_type, bytes, decode_opts))
        .collect();

    let (grpc_status, grpc_message) = extract_trailer_metadata(&response_unwrapped.trailers);

    Ok(EnrichedRecord {
        captured,
        service_full_name: service_full_name.to_string(),
        method_name: method_name.to_string(),
        decoded_request,
        decoded_responses,
        grpc_status,
        grpc_message,
        warnings,
    })
}

fn extract_trailer_metadata(trailers: &Option<Vec<(String, String)>>) -> (Option<i32>, Option<String>) {
    let Some(trailers) = trailers else {
        return (None, None);
    };

    let status = trailers
        .iter()
        .find(|(k, _)| k == "grpc-status")
        .and_then(|(_, v)| v.parse::<i32>().ok());

    let message = trailers
        .iter()
        .find(|(k, _)| k == "grpc-message")
        .map(|(_, v)| percent_decode_str(v).decode_utf8_lossy().into_owned());

    (status, message)
}

/// Re-decodes an already-emitted record against the registry's current
/// state, preserving every captured/identity field so re-decoding stays
/// idempotent.
pub fn redecode(
    registry: &Registry,
    previous: &EnrichedRecord,
    decode_opts: &DecodeOptions,
    framing_config: &FramingConfig,
) -> ProcessResult<EnrichedRecord> {
    process(registry, previous.captured.clone(), decode_opts, framing_config)
}
