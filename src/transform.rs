//! Transform Pipelines
//!
//! Named state-to-state transforms, ordered pipelines over them, per-name
//! execution metrics and a pipeline result cache. A transform reads a
//! context's merged view and its output is folded back into the local layer.
//!
//! Pipelines run their steps one at a time, each step writing back before
//! the next reads, so a pipeline behaves exactly like applying its transforms
//! in sequence. A failing step stops the pipeline; earlier steps stay applied.

mod builtin;
mod metrics;

pub use builtin::{
    flatten_map, normalize_key, sanitize, BuiltinTransform, DEFAULT_FLATTEN_SEPARATOR,
    DEFAULT_MESSAGE_LIMIT,
};
pub use metrics::TransformMetrics;

use crate::context::{ChainRevision, ContextStore};
use crate::error::StateError;
use crate::events::{Event, EVENT_PIPELINE_APPLIED, EVENT_TRANSFORMED};
use crate::state::State;
use crate::types::{now, ContextId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A registered transform
pub type TransformFn = Arc<dyn Fn(State) -> Result<State, StateError> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cache the final state per context and time bucket
    #[serde(default)]
    pub cache: bool,
    /// Free-form options carried for hosts
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl PipelineConfig {
    pub fn cached() -> Self {
        Self {
            cache: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub id: String,
    pub transforms: Vec<String>,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub context_id: ContextId,
    pub transform: String,
    pub duration: Duration,
    /// Merged view after write-back
    pub state: State,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub context_id: ContextId,
    pub pipeline_id: String,
    pub from_cache: bool,
    pub transforms_applied: usize,
    pub duration: Duration,
    /// Merged view after the last step
    pub state: State,
}

type CacheKey = (ContextId, String, u64);

struct CacheEntry {
    revision: ChainRevision,
    state: State,
}

#[derive(Default)]
struct PipelineInner {
    transforms: BTreeMap<String, TransformFn>,
    pipelines: BTreeMap<String, PipelineDef>,
    cache: HashMap<CacheKey, CacheEntry>,
    transform_metrics: HashMap<String, TransformMetrics>,
    pipeline_metrics: HashMap<String, TransformMetrics>,
}

pub struct TransformPipeline {
    store: Arc<ContextStore>,
    cache_bucket_secs: u64,
    inner: RwLock<PipelineInner>,
}

impl TransformPipeline {
    /// Create a pipeline engine with the built-ins registered under their names
    ///
    /// `cache_bucket_secs` sets the cache time bucket; 0 disables time-based
    /// expiry so only a context mutation invalidates an entry.
    pub fn new(store: Arc<ContextStore>, cache_bucket_secs: u64) -> Result<Self, StateError> {
        let pipeline = Self {
            store,
            cache_bucket_secs,
            inner: RwLock::new(PipelineInner::default()),
        };
        for builtin in BuiltinTransform::defaults() {
            pipeline.register_builtin(builtin.name(), builtin)?;
        }
        Ok(pipeline)
    }

    /// Register a transform, replacing any previous one with the same name
    pub fn register_transform<F>(&self, name: &str, transform: F)
    where
        F: Fn(State) -> Result<State, StateError> + Send + Sync + 'static,
    {
        self.insert_transform(name, Arc::new(transform));
    }

    pub fn register_builtin(&self, name: &str, builtin: BuiltinTransform) -> Result<(), StateError> {
        let transform = builtin.into_fn()?;
        self.insert_transform(name, transform);
        Ok(())
    }

    /// Register a built-in configured from host values, e.g. `("limitMessages", {"limit": 5})`
    pub fn register_from_config(
        &self,
        name: &str,
        kind: &str,
        config: &Value,
    ) -> Result<(), StateError> {
        self.register_builtin(name, BuiltinTransform::from_config(kind, config)?)
    }

    fn insert_transform(&self, name: &str, transform: TransformFn) {
        if self
            .inner
            .write()
            .transforms
            .insert(name.to_string(), transform)
            .is_some()
        {
            debug!(name, "Replaced transform");
        }
    }

    pub fn list_transforms(&self) -> Vec<String> {
        self.inner.read().transforms.keys().cloned().collect()
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.inner.read().transforms.contains_key(name)
    }

    /// Define an ordered pipeline; transforms are resolved when it runs
    pub fn register_pipeline(
        &self,
        id: &str,
        transforms: Vec<String>,
        config: PipelineConfig,
    ) -> Result<(), StateError> {
        if id.is_empty() {
            return Err(StateError::InvalidArgument(
                "pipeline id must not be empty".to_string(),
            ));
        }
        let mut inner = self.inner.write();
        inner.pipelines.insert(
            id.to_string(),
            PipelineDef {
                id: id.to_string(),
                transforms,
                config,
            },
        );
        inner
            .pipeline_metrics
            .insert(id.to_string(), TransformMetrics::default());
        inner.cache.retain(|key, _| key.1 != id);
        debug!(pipeline_id = id, "Registered pipeline");
        Ok(())
    }

    pub fn get_pipeline(&self, id: &str) -> Result<PipelineDef, StateError> {
        self.inner
            .read()
            .pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::PipelineNotFound(id.to_string()))
    }

    pub fn list_pipelines(&self) -> Vec<PipelineDef> {
        self.inner.read().pipelines.values().cloned().collect()
    }

    /// Run one transform and fold the output back into the context
    fn run_step(&self, context_id: &str, name: &str) -> Result<Duration, StateError> {
        let transform = self
            .inner
            .read()
            .transforms
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::TransformNotFound(name.to_string()))?;

        let input = self.store.as_state(context_id)?;
        let started = Instant::now();
        let result = transform(input.clone());
        let duration = started.elapsed();

        self.inner
            .write()
            .transform_metrics
            .entry(name.to_string())
            .or_default()
            .record(duration, result.is_ok());

        let output = result.map_err(|e| match e {
            StateError::TransformFailed { .. } => e,
            other => StateError::TransformFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.store.merge_into_local(context_id, &input, output)?;
        Ok(duration)
    }

    pub fn apply_transform(
        &self,
        context_id: &str,
        name: &str,
    ) -> Result<TransformOutcome, StateError> {
        let duration = self.run_step(context_id, name).map_err(|e| {
            warn!(context_id, transform = name, error = %e, "Transform failed");
            e
        })?;
        self.store.events().append(Event::custom(
            EVENT_TRANSFORMED,
            context_id,
            json!({ "transform": name, "duration_us": duration.as_micros() as u64 }),
        ));
        debug!(context_id, transform = name, ?duration, "Applied transform");
        Ok(TransformOutcome {
            context_id: context_id.to_string(),
            transform: name.to_string(),
            duration,
            state: self.store.as_state(context_id)?,
        })
    }

    fn cache_bucket(&self) -> u64 {
        if self.cache_bucket_secs == 0 {
            return 0;
        }
        now().timestamp().max(0) as u64 / self.cache_bucket_secs
    }

    /// Run a pipeline's transforms in order against a context
    ///
    /// With caching enabled, a repeat call in the same time bucket with no
    /// intervening change to the context or any of its ancestors returns the
    /// cached state without re-running any transform.
    pub fn apply_pipeline(
        &self,
        context_id: &str,
        pipeline_id: &str,
    ) -> Result<PipelineOutcome, StateError> {
        let def = self.get_pipeline(pipeline_id)?;
        let revision = self.store.revision(context_id)?;
        let key: CacheKey = (
            context_id.to_string(),
            pipeline_id.to_string(),
            self.cache_bucket(),
        );

        if def.config.cache {
            let mut inner = self.inner.write();
            let cached = inner
                .cache
                .get(&key)
                .filter(|entry| entry.revision == revision)
                .map(|entry| entry.state.clone());
            let metrics = inner
                .pipeline_metrics
                .entry(pipeline_id.to_string())
                .or_default();
            metrics.record_cache(cached.is_some());
            if let Some(state) = cached {
                debug!(context_id, pipeline_id, "Pipeline cache hit");
                return Ok(PipelineOutcome {
                    context_id: context_id.to_string(),
                    pipeline_id: pipeline_id.to_string(),
                    from_cache: true,
                    transforms_applied: def.transforms.len(),
                    duration: Duration::ZERO,
                    state,
                });
            }
        }

        let started = Instant::now();
        let mut applied = 0;
        for name in &def.transforms {
            if let Err(e) = self.run_step(context_id, name) {
                self.record_pipeline(pipeline_id, started.elapsed(), false);
                warn!(
                    context_id,
                    pipeline_id,
                    transform = %name,
                    applied,
                    error = %e,
                    "Pipeline stopped"
                );
                return Err(e);
            }
            applied += 1;
        }
        let duration = started.elapsed();
        self.record_pipeline(pipeline_id, duration, true);

        let (state, revision) = self.store.state_at_revision(context_id)?;
        if def.config.cache {
            let mut inner = self.inner.write();
            inner
                .cache
                .retain(|k, _| !(k.0 == context_id && k.1 == pipeline_id));
            inner.cache.insert(
                key,
                CacheEntry {
                    revision,
                    state: state.clone(),
                },
            );
        }

        self.store.events().append(Event::custom(
            EVENT_PIPELINE_APPLIED,
            context_id,
            json!({
                "pipeline_id": pipeline_id,
                "transforms_applied": applied,
                "duration_us": duration.as_micros() as u64,
            }),
        ));
        info!(context_id, pipeline_id, applied, ?duration, "Applied pipeline");
        Ok(PipelineOutcome {
            context_id: context_id.to_string(),
            pipeline_id: pipeline_id.to_string(),
            from_cache: false,
            transforms_applied: applied,
            duration,
            state,
        })
    }

    fn record_pipeline(&self, pipeline_id: &str, duration: Duration, success: bool) {
        self.inner
            .write()
            .pipeline_metrics
            .entry(pipeline_id.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Metrics for a pipeline id, falling back to a transform name
    pub fn get_metrics(&self, id: &str) -> Result<TransformMetrics, StateError> {
        let inner = self.inner.read();
        inner
            .pipeline_metrics
            .get(id)
            .or_else(|| inner.transform_metrics.get(id))
            .cloned()
            .ok_or_else(|| StateError::MetricsNotFound(id.to_string()))
    }

    /// Drop every cached pipeline result; returns how many were dropped
    pub fn clear_cache(&self) -> usize {
        let mut inner = self.inner.write();
        let dropped = inner.cache.len();
        inner.cache.clear();
        debug!(dropped, "Cleared pipeline cache");
        dropped
    }

    pub fn cache_len(&self) -> usize {
        self.inner.read().cache.len()
    }
}
