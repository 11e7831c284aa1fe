use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::core::engine::{EngineError, GenerationEngine, GenerationPipeline};
use crate::core::model::ModelDescriptor;
use crate::core::{Error, Result};

type Slot = Arc<OnceCell<Arc<dyn GenerationPipeline>>>;

/// Process-wide owner of every loaded pipeline.
///
/// Each descriptor gets its own once-cell slot. The map's shard lock is only
/// held long enough to find or insert the slot; the load itself runs under
/// the slot, so concurrent first requests for one descriptor share a single
/// load while loads for other descriptors proceed in parallel. A failed load
/// leaves the slot empty and the next caller tries again.
pub struct PipelineCache {
    engine: Arc<dyn GenerationEngine>,
    slots: DashMap<ModelDescriptor, Slot>,
}

impl PipelineCache {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self {
            engine,
            slots: DashMap::new(),
        }
    }

    pub async fn get_or_create(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>> {
        if let Some(pipeline) = self.get(descriptor) {
            return Ok(pipeline);
        }

        let slot: Slot = Arc::clone(&self.slots.entry(descriptor.clone()).or_default());
        let pipeline = slot.get_or_try_init(|| self.load(descriptor)).await?;

        Ok(Arc::clone(pipeline))
    }

    /// Returns the pipeline for `descriptor` if it has finished loading.
    pub fn get(&self, descriptor: &ModelDescriptor) -> Option<Arc<dyn GenerationPipeline>> {
        self.slots
            .get(descriptor)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    pub fn is_loaded(&self, descriptor: &ModelDescriptor) -> bool {
        self.get(descriptor).is_some()
    }

    pub fn loaded(&self) -> Vec<ModelDescriptor> {
        self.slots
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn GenerationPipeline>> {
        tracing::info!(
            model = %descriptor.logical_name,
            model_id = %descriptor.model_id,
            device = %descriptor.device,
            precision = %descriptor.precision,
            "Loading pipeline"
        );

        let start = Instant::now();
        let engine = Arc::clone(&self.engine);
        let owned = descriptor.clone();

        let loaded = tokio::task::spawn_blocking(move || engine.load(&owned))
            .await
            .map_err(|e| EngineError::Other(format!("load task aborted: {e}")))
            .and_then(|result| result);

        match loaded {
            Ok(pipeline) => {
                tracing::info!(
                    model = %descriptor.logical_name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Pipeline ready"
                );
                Ok(pipeline)
            }
            Err(source) => {
                tracing::error!(
                    model = %descriptor.logical_name,
                    model_id = %descriptor.model_id,
                    error = %source,
                    "Pipeline load failed"
                );
                Err(Error::ModelLoad {
                    model_id: descriptor.model_id.clone(),
                    source,
                })
            }
        }
    }
}
