use std::sync::Arc;
use std::time::Instant;

use moka::sync::Cache;

use crate::config::ConversionSettings;
use crate::engine::{ConversionEngine, PipelineHandle};
use crate::error::EngineError;
use crate::pipeline::key::{PipelineKey, PipelineOptions};

/// Memoizes constructed pipelines per [`PipelineKey`].
///
/// Concurrent first-time resolves of one key run the engine's `construct`
/// exactly once; the other callers block until that construction finishes
/// and then share its handle. Failed constructions are not stored.
pub struct PipelineCache {
    engine: Arc<dyn ConversionEngine>,
    cache: Cache<PipelineKey, PipelineHandle>,
}

impl PipelineCache {
    pub fn new(engine: Arc<dyn ConversionEngine>, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.max(1))
            .eviction_listener(|key: Arc<PipelineKey>, _value, cause| {
                log::debug!("Evicted pipeline {} ({:?})", key, cause);
            })
            .build();
        Self { engine, cache }
    }

    pub fn resolve(&self, settings: &ConversionSettings) -> Result<PipelineHandle, EngineError> {
        let options = PipelineOptions::from_settings(settings);
        let key = PipelineKey::from_options(&options);

        if let Some(handle) = self.cache.get(&key) {
            log::debug!("Pipeline cache hit for {}", key);
            return Ok(handle);
        }

        let digest = key.digest().to_string();
        let engine = Arc::clone(&self.engine);
        let init = move || -> Result<PipelineHandle, EngineError> {
            let started = Instant::now();
            log::info!("Constructing {} pipeline {}", engine.name(), digest);
            let pipeline = engine.construct(&options)?;
            log::info!(
                "Pipeline {} ready in {}ms",
                digest,
                started.elapsed().as_millis()
            );
            Ok(Arc::from(pipeline))
        };

        self.cache
            .try_get_with(key, init)
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|arc| arc.as_ref().clone()))
    }

    pub fn contains(&self, settings: &ConversionSettings) -> bool {
        self.cache.contains_key(&PipelineKey::from_settings(settings))
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}
