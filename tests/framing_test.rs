//! Drives `framing::unwrap` through the parts of the pipeline the module's
//! own unit tests don't cover: a per-frame-compressed data frame and a
//! multi-frame server-streaming response.

use flate2::write::GzEncoder;
use flate2::Compression;
use grpc_trace_core::framing::{unwrap, FramingConfig, FramingInput};
use std::io::Write;

const COMPRESSED_FLAG: u8 = 0x01;
const TRAILER_FLAG: u8 = 0x80;

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn frame(flags: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![flags];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[test]
fn per_frame_compressed_data_frame_is_inflated_individually() {
    let payload = b"this particular frame is gzip-compressed on its own";
    let compressed = gzip(payload);

    let mut body = frame(COMPRESSED_FLAG, &compressed);
    body.extend(frame(0, b"this one is plain"));

    let input = FramingInput {
        raw: &body,
        content_type: "application/grpc-web+proto",
        ..Default::default()
    };
    let output = unwrap(&input, &FramingConfig::default());
    assert_eq!(output.frames, vec![payload.to_vec(), b"this one is plain".to_vec()]);
}

#[test]
fn server_streaming_response_yields_ordered_frames_plus_trailer() {
    let mut body = frame(0, b"first item");
    body.extend(frame(0, b"second item"));
    body.extend(frame(0, b"third item"));
    body.extend(frame(TRAILER_FLAG, b"grpc-status: 0\r\n"));

    let input = FramingInput {
        raw: &body,
        content_type: "application/connect+proto",
        ..Default::default()
    };
    let output = unwrap(&input, &FramingConfig::default());

    assert_eq!(
        output.frames,
        vec![b"first item".to_vec(), b"second item".to_vec(), b"third item".to_vec()]
    );
    assert_eq!(
        output.trailers.unwrap(),
        vec![("grpc-status".to_string(), "0".to_string())]
    );
}

#[test]
fn gzip_output_budget_falls_back_to_compressed_bytes_on_overflow() {
    // A deliberately undersized budget makes per-frame inflation exceed its
    // cap; the frame should fall back to its still-compressed bytes with a
    // warning rather than the call panicking or silently truncating.
    let payload = vec![b'a'; 4096];
    let compressed = gzip(&payload);
    let body = frame(COMPRESSED_FLAG, &compressed);

    let input = FramingInput {
        raw: &body,
        content_type: "application/grpc-web+proto",
        ..Default::default()
    };
    let config = FramingConfig { gzip_max_output_bytes: 16 };
    let output = unwrap(&input, &config);
    assert_eq!(output.frames, vec![compressed]);
    assert!(!output.warnings.is_empty());
}
