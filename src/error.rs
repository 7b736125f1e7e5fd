//! Top-level error type aggregating each module's error kind, following the
//! teacher's `CoreError` pattern (`granc/src/core.rs`): one enum with
//! `#[from]` chains so callers at the engine boundary match on one type.

use crate::codec::EncodeError;
use crate::record::ProcessError;
use crate::registry::RegistryError;
use crate::reflection::ReflectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Reflection(#[from] ReflectionError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
