//! Candle-backed [`GenerationEngine`].
//!
//! Supports the two architectures the registry points at: BLOOM (native, see
//! [`bloom`]) and StarCoder2 (from `candle-transformers`).

pub mod bloom;

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::starcoder2;
use parking_lot::Mutex;
use tokenizers::Tokenizer;

use crate::core::{
    Candidate, DevicePreference, EngineError, GenerationEngine, GenerationParams,
    GenerationPipeline, ModelDescriptor, Precision, SamplingOptions,
};
use crate::infra::hub::{ModelFiles, ModelStore};

const DEFAULT_SEED: u64 = 299_792_458;

pub struct CandleEngine {
    store: ModelStore,
}

impl CandleEngine {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }
}

impl GenerationEngine for CandleEngine {
    fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, EngineError> {
        let start = Instant::now();
        let device = device_for(descriptor.device)?;
        let dtype = dtype_for(descriptor.precision, &device)?;
        let files = self.store.resolve(&descriptor.model_id)?;

        let pipeline = CandlePipeline::load(descriptor.clone(), &files, device, dtype)?;
        tracing::info!(
            model_id = %descriptor.model_id,
            dtype = ?dtype,
            shards = files.weights.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Weights loaded"
        );
        Ok(Arc::new(pipeline))
    }
}

fn device_for(preference: DevicePreference) -> Result<Device, EngineError> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Gpu => Device::new_cuda(0)
            .map_err(|e| EngineError::Unsupported(format!("GPU device unavailable: {e}"))),
    }
}

fn dtype_for(precision: Precision, device: &Device) -> Result<DType, EngineError> {
    match (precision, device) {
        (Precision::Full, _) => Ok(DType::F32),
        (Precision::Half, Device::Cpu) => Err(EngineError::Unsupported(
            "half precision requires a GPU device".to_string(),
        )),
        (Precision::Half, _) => Ok(DType::F16),
    }
}

/// The subset of `config.json` shared by every architecture.
#[derive(Debug, serde::Deserialize)]
struct CommonConfig {
    model_type: String,
    #[serde(default)]
    bos_token_id: Option<u32>,
    #[serde(default)]
    eos_token_id: Option<u32>,
}

enum CausalModel {
    Bloom(bloom::Model),
    Starcoder2(starcoder2::Model),
}

impl CausalModel {
    fn reset(&mut self) {
        if let Self::Starcoder2(model) = self {
            model.clear_kv_cache();
        }
    }

    /// Logits for the token following `tokens`. `processed` is how many of
    /// them earlier calls already fed through the model.
    fn next_logits(
        &mut self,
        tokens: &[u32],
        processed: usize,
        device: &Device,
    ) -> candle_core::Result<Tensor> {
        let logits = match self {
            Self::Bloom(model) => {
                let input = Tensor::new(tokens, device)?.unsqueeze(0)?;
                model.forward(&input)?
            }
            Self::Starcoder2(model) => {
                let input = Tensor::new(&tokens[processed..], device)?.unsqueeze(0)?;
                model.forward(&input, processed)?
            }
        };
        last_row(&logits)?.to_dtype(DType::F32)
    }
}

fn last_row(logits: &Tensor) -> candle_core::Result<Tensor> {
    let vocab = logits.dim(candle_core::D::Minus1)?;
    let rows = logits.elem_count() / vocab;
    logits.reshape((rows, vocab))?.get(rows - 1)
}

pub struct CandlePipeline {
    descriptor: ModelDescriptor,
    model: Mutex<CausalModel>,
    tokenizer: Tokenizer,
    device: Device,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
}

impl CandlePipeline {
    fn load(
        descriptor: ModelDescriptor,
        files: &ModelFiles,
        device: Device,
        dtype: DType,
    ) -> Result<Self, EngineError> {
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&files.config)?)?;
        let common: CommonConfig = serde_json::from_value(raw.clone())?;
        if !matches!(common.model_type.as_str(), "bloom" | "starcoder2") {
            return Err(EngineError::Unsupported(format!(
                "model type '{}' for {}",
                common.model_type, descriptor.model_id
            )));
        }

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;

        // SAFETY: the store only hands out files it has finished writing, and
        // nothing rewrites them while the mapping is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)? };

        let model = if common.model_type == "bloom" {
            let config: bloom::Config = serde_json::from_value(raw)?;
            CausalModel::Bloom(bloom::Model::load(&config, vb)?)
        } else {
            let config: starcoder2::Config = serde_json::from_value(raw)?;
            CausalModel::Starcoder2(starcoder2::Model::new(&config, vb)?)
        };

        let eos_token_id = common
            .eos_token_id
            .or_else(|| tokenizer.token_to_id("</s>"))
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"));
        let bos_token_id = common
            .bos_token_id
            .or_else(|| tokenizer.token_to_id("<s>"));

        Ok(Self {
            descriptor,
            model: Mutex::new(model),
            tokenizer,
            device,
            bos_token_id,
            eos_token_id,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        Ok(self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?
            .get_ids()
            .to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))
    }

    /// Extends `prompt_ids` until `max_length` total tokens or end of sequence.
    fn extend(
        &self,
        prompt_ids: Vec<u32>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>, EngineError> {
        let mut model = self.model.lock();
        model.reset();

        let mut processor = logits_processor(&params.sampling);
        let mut tokens = prompt_ids;
        let mut processed = 0;

        while tokens.len() < params.max_length {
            let logits = model.next_logits(&tokens, processed, &self.device)?;
            processed = tokens.len();

            let next = processor.sample(&logits)?;
            if Some(next) == self.eos_token_id {
                break;
            }
            tokens.push(next);
        }

        Ok(tokens)
    }
}

fn logits_processor(options: &SamplingOptions) -> LogitsProcessor {
    let seed = options.seed.unwrap_or(DEFAULT_SEED);
    let sampling = match (options.temperature, options.top_p) {
        (None, _) => Sampling::ArgMax,
        (Some(t), _) if t <= 0.0 => Sampling::ArgMax,
        (Some(temperature), Some(p)) if p > 0.0 && p < 1.0 => Sampling::TopP { p, temperature },
        (Some(temperature), _) => Sampling::All { temperature },
    };
    LogitsProcessor::from_sampling(seed, sampling)
}

impl GenerationPipeline for CandlePipeline {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<Candidate>, EngineError> {
        let mut prompt_ids = self.encode(prompt)?;
        if prompt_ids.is_empty() {
            match self.bos_token_id.or(self.eos_token_id) {
                Some(seed) => prompt_ids.push(seed),
                None => {
                    return Ok(vec![Candidate {
                        generated_text: String::new(),
                    }])
                }
            }
        }

        let prompt_len = prompt_ids.len();
        let prompt_text = self.decode(&prompt_ids)?;
        let tokens = self.extend(prompt_ids, params)?;
        tracing::debug!(
            prompt_tokens = prompt_len,
            new_tokens = tokens.len().saturating_sub(prompt_len),
            "Decoded"
        );

        // Decoding the whole sequence keeps word boundaries between prompt
        // and continuation intact.
        let full = self.decode(&tokens)?;
        let continuation = match full.get(prompt_text.len()..) {
            Some(rest) if full.starts_with(&prompt_text) => rest.to_string(),
            _ => self.decode(&tokens[prompt_len..])?,
        };

        let generated_text = if params.return_full_text {
            format!("{prompt}{continuation}")
        } else {
            continuation
        };
        Ok(vec![Candidate { generated_text }])
    }
}
