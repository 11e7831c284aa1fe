//! In-memory engine used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use super::{Candidate, EngineError, GenerationEngine, GenerationParams, GenerationPipeline};
use crate::core::model::ModelDescriptor;

/// Continues a prompt with one `"lorem"` word per remaining token, where a
/// token is a whitespace-separated word.
pub struct EchoEngine {
    pub loads: AtomicUsize,
    pub generations: Arc<AtomicUsize>,
    load_delay: Option<Duration>,
    load_barrier: Option<Arc<Barrier>>,
    failures_left: AtomicUsize,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            generations: Arc::new(AtomicUsize::new(0)),
            load_delay: None,
            load_barrier: None,
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn with_load_barrier(mut self, parties: usize) -> Self {
        self.load_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn failing_loads(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }
}

impl GenerationEngine for EchoEngine {
    fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if let Some(barrier) = &self.load_barrier {
            barrier.wait();
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EngineError::NotFound(descriptor.model_id.clone()));
        }

        Ok(Arc::new(EchoPipeline {
            descriptor: descriptor.clone(),
            generations: Arc::clone(&self.generations),
        }))
    }
}

pub struct EchoPipeline {
    descriptor: ModelDescriptor,
    generations: Arc<AtomicUsize>,
}

impl GenerationPipeline for EchoPipeline {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<Candidate>, EngineError> {
        self.generations.fetch_add(1, Ordering::SeqCst);

        let prompt_tokens = prompt.split_whitespace().count();
        let continuation = " lorem".repeat(params.max_length.saturating_sub(prompt_tokens));

        let generated_text = if params.return_full_text {
            format!("{prompt}{continuation}")
        } else {
            continuation
        };

        Ok(vec![Candidate { generated_text }])
    }
}
