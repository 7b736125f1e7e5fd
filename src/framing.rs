//! Unwraps a captured HTTP body into one or more protobuf payload frames,
//! plus any trailer metadata.
//!
//! Every stage is best-effort: a failure at any stage leaves the buffer as
//! it was going into that stage and records a warning rather than aborting
//! the whole pipeline, since a partially-decoded capture is still useful
//! to show.

use base64::Engine;
use flate2::read::GzDecoder;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame length-prefix points past the end of the buffer")]
    TruncatedFrame,
}

#[derive(Debug, Clone, Default)]
pub struct FramingInput<'a> {
    pub raw: &'a [u8],
    pub base64_encoded: bool,
    pub content_type: &'a str,
    pub grpc_encoding: &'a str,
    pub connect_content_encoding: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct FramingOutput {
    pub frames: Vec<Vec<u8>>,
    pub trailers: Option<Vec<(String, String)>>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FramingConfig {
    pub gzip_max_output_bytes: u64,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            gzip_max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

pub fn unwrap(input: &FramingInput, config: &FramingConfig) -> FramingOutput {
    let mut warnings = Vec::new();

    let mut buffer = normalize_to_bytes(input);

    if input.content_type.contains("grpc-web-text") {
        buffer = grpc_web_text_unwrap(&buffer);
    }

    let is_gzip = input.grpc_encoding.eq_ignore_ascii_case("gzip")
        || input.connect_content_encoding.eq_ignore_ascii_case("gzip");
    if is_gzip {
        match gzip_inflate(&buffer, config.gzip_max_output_bytes) {
            Ok(inflated) => buffer = inflated,
            Err(message) => warnings.push(message),
        }
    }

    let output = if input.content_type.contains("grpc") || input.content_type.contains("connect") {
        let (frames, trailers, mut frame_warnings) = parse_length_prefixed_frames(&buffer, config);
        warnings.append(&mut frame_warnings);
        FramingOutput {
            frames,
            trailers,
            warnings,
        }
    } else {
        FramingOutput {
            frames: vec![buffer],
            trailers: None,
            warnings,
        }
    };

    for warning in &output.warnings {
        tracing::warn!(%warning, content_type = input.content_type, "framing warning");
    }
    output
}

fn normalize_to_bytes(input: &FramingInput) -> Vec<u8> {
    if input.base64_encoded {
        match base64::engine::general_purpose::STANDARD.decode(input.raw) {
            Ok(decoded) => decoded,
            Err(_) => input.raw.to_vec(),
        }
    } else {
        input.raw.to_vec()
    }
}

/// `grpc-web-text` carries base64 text over the wire. Some captures record
/// it already decoded to binary; the heuristic below tells the two apart.
fn grpc_web_text_unwrap(buffer: &[u8]) -> Vec<u8> {
    if looks_like_binary(buffer) {
        return buffer.to_vec();
    }

    let cleaned: Vec<u8> = buffer
        .iter()
        .copied()
        .filter(|b| is_base64_alphabet_byte(*b))
        .collect();
    let mut padded = cleaned;
    while padded.len() % 4 != 0 {
        padded.push(b'=');
    }

    match base64::engine::general_purpose::STANDARD.decode(&padded) {
        Ok(decoded) => decoded,
        Err(_) => buffer.to_vec(),
    }
}

/// Only `0x00` is treated as a plausible framing flag byte. `0x01` is
/// deliberately excluded: it's a valid byte inside a base64 alphabet run
/// and collides with gzip's second magic-number byte, so treating it as
/// "probably binary" produced false positives during testing.
fn looks_like_binary(buffer: &[u8]) -> bool {
    if buffer.first() == Some(&0x00) {
        return true;
    }
    let sample_len = buffer.len().min(64);
    if sample_len == 0 {
        return false;
    }
    let non_printable = buffer[..sample_len]
        .iter()
        .filter(|b| !is_printable_ascii(**b))
        .count();
    (non_printable as f64 / sample_len as f64) >= 0.10
}

fn is_printable_ascii(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || b == b'\r' || b == b'\n' || b == b'\t'
}

fn is_base64_alphabet_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

fn gzip_inflate(buffer: &[u8], max_output_bytes: u64) -> Result<Vec<u8>, String> {
    // Read one byte past the budget so an over-budget stream is
    // distinguishable from one that exactly fills it, rather than `take`
    // silently truncating and reporting success.
    let limit = max_output_bytes.saturating_add(1);
    let mut decoder = GzDecoder::new(buffer).take(limit);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| format!("gzip inflate failed: {e}"))?;
    if out.len() as u64 > max_output_bytes {
        return Err(format!("gzip inflate exceeded {max_output_bytes} byte budget"));
    }
    Ok(out)
}

const TRAILER_FLAG: u8 = 0x80;
const COMPRESSED_FLAG: u8 = 0x01;
const FRAME_HEADER_LEN: usize = 5;

fn parse_length_prefixed_frames(
    buffer: &[u8],
    config: &FramingConfig,
) -> (Vec<Vec<u8>>, Option<Vec<(String, String)>>, Vec<String>) {
    let mut frames = Vec::new();
    let mut trailers = None;
    let mut warnings = Vec::new();
    let mut pos = 0usize;
    let mut saw_any_frame = false;

    while pos + FRAME_HEADER_LEN <= buffer.len() {
        let flags = buffer[pos];
        let length = u32::from_be_bytes(buffer[pos + 1..pos + 5].try_into().unwrap()) as usize;
        let body_start = pos + FRAME_HEADER_LEN;
        let Some(body_end) = body_start.checked_add(length).filter(|end| *end <= buffer.len()) else {
            warnings.push(FramingError::TruncatedFrame.to_string());
            break;
        };

        saw_any_frame = true;
        let body = &buffer[body_start..body_end];

        if flags & TRAILER_FLAG != 0 {
            trailers = Some(parse_trailer_lines(body));
        } else if flags & COMPRESSED_FLAG != 0 {
            match gzip_inflate(body, config.gzip_max_output_bytes) {
                Ok(inflated) => frames.push(inflated),
                Err(message) => {
                    warnings.push(message);
                    frames.push(body.to_vec());
                }
            }
        } else {
            frames.push(body.to_vec());
        }

        pos = body_end;
    }

    if !saw_any_frame {
        return (vec![buffer.to_vec()], None, warnings);
    }

    (frames, trailers, warnings)
}

fn parse_trailer_lines(body: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(body);
    text.split("\r\n")
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}
