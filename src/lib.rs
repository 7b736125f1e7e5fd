//! Protocol and schema engine for a gRPC-Web/Connect-RPC traffic inspector.
//!
//! This crate never opens a connection itself: it unwraps already-captured
//! HTTP bodies, resolves schemas either from locally-registered descriptors
//! or live gRPC Server Reflection, and decodes/encodes protobuf payloads
//! against whatever schema it can find. The capture and UI surfaces are
//! left to the embedding application.

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod framing;
pub mod record;
pub mod reflection;
pub mod registry;
pub mod value;
pub mod wire;

pub use codec::{DecodeOptions, EncodeError};
pub use config::EngineConfig;
pub use engine::{Engine, EngineCallbacks, ReflectionStatus};
pub use error::EngineError;
pub use framing::FramingConfig;
pub use record::{CapturedRecord, EnrichedRecord};
pub use registry::Registry;
pub use value::Value;
