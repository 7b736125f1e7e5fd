//! Engine configuration options, loadable from layered environment
//! overlays on top of built-in defaults.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionSettings {
    pub enabled: bool,
    pub timeout_ms: u32,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    pub strict_utf8: bool,
    pub blind_decode_threshold: f64,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            strict_utf8: false,
            blind_decode_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    pub gzip_max_output_bytes: u64,
}

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            gzip_max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reflection: ReflectionSettings,
    pub codec: CodecSettings,
    pub framing: FramingSettings,
}

impl EngineConfig {
    /// Loads configuration from process environment variables prefixed
    /// `GRPC_TRACE`, e.g. `GRPC_TRACE_REFLECTION__TIMEOUT_MS=5000`. Falls
    /// back to the all-defaults config if nothing is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("GRPC_TRACE").separator("__"))
            .build()?
            .try_deserialize()
    }
}
