//! Ties the registry, reflection coordinator and record processor together
//! behind the entry points `process`, `register_descriptors`,
//! `clear_schemas`, plus the `on_record`/`on_schema_updated`/
//! `on_reflection_status` callback contract.

use crate::codec::DecodeOptions;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::framing::FramingConfig;
use crate::record::{self, CapturedRecord, EnrichedRecord};
use crate::reflection::{ReflectionConfig, ReflectionCoordinator};
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ReflectionStatus {
    Ready,
    Failed(String),
    SkippedLocallyResolved,
    Disabled,
}

/// Callbacks the embedding application implements to receive engine
/// output.
pub trait EngineCallbacks: Send + Sync {
    fn on_record(&self, record: &EnrichedRecord);
    fn on_schema_updated(&self, origin: &str, registry: &Registry);
    fn on_reflection_status(&self, origin: &str, status: &ReflectionStatus);
}

pub struct Engine {
    registry: Arc<Mutex<Registry>>,
    reflection: Arc<ReflectionCoordinator>,
    reflection_enabled: bool,
    decode_opts: DecodeOptions,
    framing_config: FramingConfig,
    /// Per-origin bookkeeping the engine keeps solely to re-decode prior
    /// records once reflection resolves a schema for that origin. The
    /// canonical emitted-records list remains the embedding application's
    /// responsibility; this cache exists only to drive the re-emit step on
    /// schema update and is cleared along with schemas.
    history: Mutex<HashMap<String, Vec<CapturedRecord>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let reflection = Arc::new(ReflectionCoordinator::new(
            registry.clone(),
            ReflectionConfig {
                enabled: config.reflection.enabled,
                timeout: Duration::from_millis(config.reflection.timeout_ms as u64),
            },
        ));
        Self {
            registry,
            reflection,
            reflection_enabled: config.reflection.enabled,
            decode_opts: DecodeOptions {
                strict_utf8: config.codec.strict_utf8,
                blind_decode_threshold: config.codec.blind_decode_threshold,
            },
            framing_config: FramingConfig {
                gzip_max_output_bytes: config.framing.gzip_max_output_bytes,
            },
            history: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_descriptors(&self, bytes: &[u8]) -> Result<(), EngineError> {
        self.registry.lock().await.register_descriptor_set_bytes(bytes)?;
        Ok(())
    }

    pub async fn clear_schemas(&self) {
        self.registry.lock().await.clear();
        self.history.lock().await.clear();
    }

    pub async fn process(
        &self,
        captured: CapturedRecord,
        callbacks: &dyn EngineCallbacks,
    ) -> Result<EnrichedRecord, EngineError> {
        let origin = origin_of(&captured.url);

        let already_resolved = {
            let registry = self.registry.lock().await;
            registry.find_method(&captured.method_path).is_some()
        };

        let mut just_became_ready = false;

        if already_resolved {
            tracing::trace!(origin, method = %captured.method_path, "method already resolved locally");
            callbacks.on_reflection_status(&origin, &ReflectionStatus::SkippedLocallyResolved);
        } else if !self.reflection_enabled {
            callbacks.on_reflection_status(&origin, &ReflectionStatus::Disabled);
        } else {
            let was_ready_before = self.reflection.is_ready(&origin).await;
            let outcome = self.reflection.ensure_origin(&origin, &origin).await;
            match outcome.as_ref() {
                Ok(()) => {
                    callbacks.on_reflection_status(&origin, &ReflectionStatus::Ready);
                    just_became_ready = !was_ready_before;
                }
                Err(e) => {
                    tracing::warn!(origin, error = %e, "reflection unavailable for origin");
                    callbacks.on_reflection_status(&origin, &ReflectionStatus::Failed(e.to_string()));
                }
            }
        }

        let enriched = {
            let registry = self.registry.lock().await;
            record::process(&registry, captured.clone(), &self.decode_opts, &self.framing_config)?
        };

        self.history
            .lock()
            .await
            .entry(origin.clone())
            .or_default()
            .push(captured);

        if just_became_ready {
            tracing::info!(origin, "schema resolved, replaying prior records");
            self.replay_origin(&origin, callbacks).await?;
            let registry = self.registry.lock().await;
            callbacks.on_schema_updated(&origin, &registry);
        }

        callbacks.on_record(&enriched);
        Ok(enriched)
    }

    async fn replay_origin(&self, origin: &str, callbacks: &dyn EngineCallbacks) -> Result<(), EngineError> {
        let records = {
            let history = self.history.lock().await;
            history.get(origin).cloned().unwrap_or_default()
        };

        let registry = self.registry.lock().await;
        for captured in records {
            let enriched = record::process(&registry, captured, &self.decode_opts, &self.framing_config)?;
            callbacks.on_record(&enriched);
        }
        Ok(())
    }
}

fn origin_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split(['/', '?', '#']).next().unwrap_or(without_scheme);
    let scheme = url.split_once("://").map(|(scheme, _)| scheme).unwrap_or("https");
    format!("{scheme}://{authority}")
}
