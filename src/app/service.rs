//! Request-to-generation path: resolve, fetch pipeline, generate, extract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::Instrument;

use crate::api::types::GenerationRequest;
use crate::core::{
    EngineError, Error, GenerationParams, ModelDescriptor, ModelName, ModelRegistry,
    PipelineCache, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub text: String,
}

pub struct GenerationService {
    registry: ModelRegistry,
    cache: PipelineCache,
    timeout: Option<Duration>,
}

impl GenerationService {
    pub fn new(registry: ModelRegistry, cache: PipelineCache) -> Self {
        Self {
            registry,
            cache,
            timeout: None,
        }
    }

    /// Bounds how long a caller waits for a generation. Expiry does not stop
    /// the inference already running on the blocking pool.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// Validates `request` and picks the descriptor and parameters it maps to.
    ///
    /// Nothing here touches the engine, so a rejected request never loads a
    /// model.
    pub fn plan(&self, request: &GenerationRequest) -> Result<(ModelDescriptor, GenerationParams)> {
        let max_length = match request.max_length {
            Some(n) if n <= 0 => {
                return Err(Error::validation(format!(
                    "max_length must be positive, got {n}"
                )))
            }
            Some(n) => Some(usize::try_from(n).map_err(|_| {
                Error::validation(format!("max_length {n} is out of range"))
            })?),
            None => None,
        };

        let requested = request
            .model
            .as_deref()
            .unwrap_or(ModelName::DEFAULT.as_str());
        let descriptor = self.registry.resolve(requested).clone();
        if self.registry.lookup(requested).is_none() {
            tracing::warn!(
                requested,
                fallback = %descriptor.logical_name,
                "Unknown model, falling back to default"
            );
        }

        let params = GenerationParams {
            max_length: max_length.unwrap_or(descriptor.default_max_length),
            return_full_text: request.return_full_text,
            sampling: request.options.clone(),
        };

        Ok((descriptor, params))
    }

    /// Runs one generation request to completion.
    ///
    /// The work is spawned onto its own task so that neither a dropped caller
    /// nor an expired timeout cancels a model load or inference midway.
    pub async fn generate(self: &Arc<Self>, request: GenerationRequest) -> Result<GenerationResult> {
        let (descriptor, params) = self.plan(&request)?;
        let span = tracing::info_span!(
            "generate",
            request_id = %uuid::Uuid::new_v4(),
            model = %descriptor.logical_name
        );

        let service = Arc::clone(self);
        let model_id = descriptor.model_id.clone();
        let task = tokio::spawn(
            async move { service.run(descriptor, request.prompt, params).await }.instrument(span),
        );

        let joined = match self.timeout {
            Some(duration) => tokio::time::timeout(duration, task)
                .await
                .map_err(|_| Error::Timeout { duration })?,
            None => task.await,
        };

        joined.map_err(|e| Error::Generation {
            model_id,
            source: EngineError::Other(format!("generation task aborted: {e}")),
        })?
    }

    async fn run(
        &self,
        descriptor: ModelDescriptor,
        prompt: String,
        params: GenerationParams,
    ) -> Result<GenerationResult> {
        let pipeline = self.cache.get_or_create(&descriptor).await?;

        tracing::debug!(
            model_id = %pipeline.descriptor().model_id,
            precision = %pipeline.descriptor().precision,
            prompt_chars = prompt.chars().count(),
            max_length = params.max_length,
            "Generating"
        );
        let start = Instant::now();

        let candidates = tokio::task::spawn_blocking(move || pipeline.generate(&prompt, &params))
            .await
            .map_err(|e| EngineError::Other(format!("inference task aborted: {e}")))
            .and_then(|result| result)
            .map_err(|source| Error::Generation {
                model_id: descriptor.model_id.clone(),
                source,
            })?;

        let text = candidates
            .into_iter()
            .next()
            .map(|candidate| candidate.generated_text)
            .ok_or_else(|| Error::Generation {
                model_id: descriptor.model_id.clone(),
                source: EngineError::Other("engine returned no candidates".to_string()),
            })?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "Generation complete"
        );

        Ok(GenerationResult { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::testing::EchoEngine;
    use std::sync::atomic::Ordering;

    fn service(engine: Arc<EchoEngine>) -> Arc<GenerationService> {
        let registry = ModelRegistry::default();
        let cache = PipelineCache::new(engine);
        Arc::new(GenerationService::new(registry, cache))
    }

    #[tokio::test]
    async fn test_generate_returns_first_candidate() {
        let engine = Arc::new(EchoEngine::new());
        let service = service(engine.clone());

        let result = service
            .generate(GenerationRequest::new("Hello").model("bloom").max_length(3))
            .await
            .unwrap();

        assert_eq!(result.text, "Hello lorem lorem");
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_return_full_text_false_drops_prompt() {
        let service = service(Arc::new(EchoEngine::new()));

        let result = service
            .generate(GenerationRequest::new("Hello").max_length(2).return_full_text(false))
            .await
            .unwrap();

        assert_eq!(result.text, " lorem");
    }

    #[tokio::test]
    async fn test_output_bounded_by_max_length() {
        let service = service(Arc::new(EchoEngine::new()));

        for max_length in [1, 5, 50] {
            let result = service
                .generate(GenerationRequest::new("one two").max_length(max_length))
                .await
                .unwrap();
            let tokens = result.text.split_whitespace().count();
            assert!(tokens <= (max_length as usize).max(2));
        }
    }

    #[tokio::test]
    async fn test_non_positive_max_length_rejected_before_engine() {
        let engine = Arc::new(EchoEngine::new());
        let service = service(engine.clone());

        for max_length in [0, -1, i64::MIN] {
            let err = service
                .generate(GenerationRequest::new("Hello").max_length(max_length))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation { .. }));
        }

        assert_eq!(engine.loads.load(Ordering::SeqCst), 0);
        assert_eq!(engine.generations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_uses_default_pipeline() {
        let engine = Arc::new(EchoEngine::new());
        let service = service(engine.clone());

        service
            .generate(GenerationRequest::new("Hello").model("unknown-model-xyz"))
            .await
            .unwrap();
        service
            .generate(GenerationRequest::new("Hello").model("bloom"))
            .await
            .unwrap();
        service.generate(GenerationRequest::new("Hello")).await.unwrap();

        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache().loaded()[0].logical_name, ModelName::Bloom);
    }

    #[tokio::test]
    async fn test_empty_prompt_reaches_engine() {
        let engine = Arc::new(EchoEngine::new());
        let service = service(engine.clone());

        let result = service
            .generate(GenerationRequest::new("").max_length(1))
            .await
            .unwrap();

        assert_eq!(result.text, " lorem");
        assert_eq!(engine.generations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_failure_surfaces_as_model_load() {
        let engine = Arc::new(EchoEngine::new().failing_loads(1));
        let service = service(engine.clone());

        let err = service
            .generate(GenerationRequest::new("Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoad { .. }));

        service.generate(GenerationRequest::new("Hello")).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel_load() {
        let engine = Arc::new(EchoEngine::new().with_load_delay(Duration::from_millis(200)));
        let registry = ModelRegistry::default();
        let service = Arc::new(
            GenerationService::new(registry, PipelineCache::new(engine.clone()))
                .with_timeout(Some(Duration::from_millis(20))),
        );

        let err = service
            .generate(GenerationRequest::new("Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(service.cache().len(), 1);
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }
}
