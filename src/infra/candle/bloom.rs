//! BLOOM decoder: fused QKV attention with ALiBi position bias and a language
//! model head tied to the word embeddings.
//!
//! The forward pass recomputes the whole sequence on every call; the service
//! generates short completions, so there is no key/value cache.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    #[serde(alias = "n_embed")]
    pub hidden_size: usize,
    #[serde(alias = "num_hidden_layers")]
    pub n_layer: usize,
    #[serde(alias = "num_attention_heads")]
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub apply_residual_connection_post_layernorm: bool,
}

impl Config {
    fn head_dim(&self) -> usize {
        self.hidden_size / self.n_head
    }
}

/// Per-head ALiBi slopes, including the interleaved extra slopes used when
/// the head count is not a power of two.
pub fn alibi_slopes(n_head: usize) -> Vec<f32> {
    let closest = 1usize << (usize::BITS - 1 - n_head.leading_zeros());
    let base = 2f64.powf(-(2f64.powf(-((closest as f64).log2() - 3.0))));
    let mut slopes: Vec<f32> = (1..=closest).map(|i| base.powi(i as i32) as f32).collect();

    if closest != n_head {
        let extra_base = 2f64.powf(-(2f64.powf(-(((2 * closest) as f64).log2() - 3.0))));
        let remaining = closest.min(n_head - closest);
        slopes.extend((0..remaining).map(|i| extra_base.powi((2 * i + 1) as i32) as f32));
    }

    slopes
}

fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<u8> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (seq_len, seq_len), device)
}

struct Attention {
    query_key_value: Linear,
    dense: Linear,
    n_head: usize,
    head_dim: usize,
    slopes: Tensor,
}

impl Attention {
    fn load(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let slopes = Tensor::from_vec(alibi_slopes(cfg.n_head), cfg.n_head, vb.device())?;
        Ok(Self {
            query_key_value: linear(hidden, 3 * hidden, vb.pp("query_key_value"))?,
            dense: linear(hidden, hidden, vb.pp("dense"))?,
            n_head: cfg.n_head,
            head_dim: cfg.head_dim(),
            slopes,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, hidden) = xs.dims3()?;
        let dtype = xs.dtype();

        // Fused projection is laid out as [head][q|k|v][head_dim].
        let fused = self
            .query_key_value
            .forward(xs)?
            .reshape((b, t, self.n_head, 3, self.head_dim))?;
        let split = |i: usize| -> Result<Tensor> {
            fused
                .narrow(3, i, 1)?
                .squeeze(3)?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(0)?.to_dtype(DType::F32)?;
        let k = split(1)?.to_dtype(DType::F32)?;
        let v = split(2)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;

        let positions = Tensor::arange(0u32, t as u32, xs.device())?.to_dtype(DType::F32)?;
        let alibi = self
            .slopes
            .reshape((self.n_head, 1))?
            .broadcast_mul(&positions.reshape((1, t))?)?
            .reshape((1, self.n_head, 1, t))?;
        let scores = scores.broadcast_add(&alibi)?;

        let neg_inf = Tensor::new(f32::NEG_INFINITY, xs.device())?.broadcast_as(scores.shape())?;
        let scores = mask.broadcast_as(scores.shape())?.where_cond(&neg_inf, &scores)?;

        let probs = candle_nn::ops::softmax_last_dim(&scores)?.to_dtype(dtype)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, hidden))?;

        self.dense.forward(&context)
    }
}

struct Mlp {
    dense_h_to_4h: Linear,
    dense_4h_to_h: Linear,
}

impl Mlp {
    fn load(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        Ok(Self {
            dense_h_to_4h: linear(hidden, 4 * hidden, vb.pp("dense_h_to_4h"))?,
            dense_4h_to_h: linear(4 * hidden, hidden, vb.pp("dense_4h_to_h"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.dense_4h_to_h
            .forward(&self.dense_h_to_4h.forward(xs)?.gelu()?)
    }
}

struct Block {
    input_layernorm: LayerNorm,
    self_attention: Attention,
    post_attention_layernorm: LayerNorm,
    mlp: Mlp,
    residual_post_layernorm: bool,
}

impl Block {
    fn load(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let eps = cfg.layer_norm_epsilon;
        Ok(Self {
            input_layernorm: layer_norm(hidden, eps, vb.pp("input_layernorm"))?,
            self_attention: Attention::load(cfg, vb.pp("self_attention"))?,
            post_attention_layernorm: layer_norm(hidden, eps, vb.pp("post_attention_layernorm"))?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
            residual_post_layernorm: cfg.apply_residual_connection_post_layernorm,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let normed = self.input_layernorm.forward(xs)?;
        let residual = if self.residual_post_layernorm { &normed } else { xs };
        let attended = (self.self_attention.forward(&normed, mask)? + residual)?;

        let normed = self.post_attention_layernorm.forward(&attended)?;
        let residual = if self.residual_post_layernorm {
            &normed
        } else {
            &attended
        };
        self.mlp.forward(&normed)? + residual
    }
}

pub struct Model {
    word_embeddings: Embedding,
    word_embeddings_layernorm: LayerNorm,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
}

impl Model {
    pub fn load(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        // Checkpoints exported from BloomForCausalLM nest everything under
        // `transformer.`; the bigscience uploads do not.
        let vb = if vb.contains_tensor("transformer.word_embeddings.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let hidden = cfg.hidden_size;
        let eps = cfg.layer_norm_epsilon;
        let word_embeddings = embedding(cfg.vocab_size, hidden, vb.pp("word_embeddings"))?;
        let word_embeddings_layernorm = layer_norm(hidden, eps, vb.pp("word_embeddings_layernorm"))?;
        let blocks = (0..cfg.n_layer)
            .map(|i| Block::load(cfg, vb.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = layer_norm(hidden, eps, vb.pp("ln_f"))?;
        let lm_head = Linear::new(word_embeddings.embeddings().clone(), None);

        Ok(Self {
            word_embeddings,
            word_embeddings_layernorm,
            blocks,
            ln_f,
            lm_head,
        })
    }

    /// Logits for the last position, shape `(batch, vocab)`.
    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let mask = causal_mask(seq_len, input_ids.device())?;

        let mut xs = self.word_embeddings.forward(input_ids)?;
        xs = self.word_embeddings_layernorm.forward(&xs)?;
        for block in &self.blocks {
            xs = block.forward(&xs, &mask)?;
        }

        let last = self.ln_f.forward(&xs)?.narrow(1, seq_len - 1, 1)?.squeeze(1)?;
        self.lm_head.forward(&last)?.to_dtype(DType::F32)?.contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alibi_slopes_power_of_two() {
        let slopes = alibi_slopes(16);
        assert_eq!(slopes.len(), 16);
        assert!((slopes[0] - 2f32.powf(-0.5)).abs() < 1e-6);
        assert!((slopes[15] - 2f32.powf(-8.0)).abs() < 1e-6);
    }

    #[test]
    fn test_alibi_slopes_non_power_of_two() {
        let slopes = alibi_slopes(12);
        assert_eq!(slopes.len(), 12);
        // first 8 follow the 8-head geometric series
        assert!((slopes[0] - 0.5).abs() < 1e-6);
        // remaining 4 take odd powers of the 16-head base
        assert!((slopes[8] - 2f32.powf(-0.5)).abs() < 1e-6);
        assert!((slopes[9] - 2f32.powf(-1.5)).abs() < 1e-6);
        assert!((slopes[11] - 2f32.powf(-3.5)).abs() < 1e-6);
    }

    #[test]
    fn test_alibi_slopes_decrease_within_each_series() {
        let slopes = alibi_slopes(24);
        assert_eq!(slopes.len(), 24);
        assert!(slopes[..16].windows(2).all(|w| w[0] > w[1]));
        assert!(slopes[16..].windows(2).all(|w| w[0] > w[1]));
        assert!(slopes.iter().all(|s| *s > 0.0 && *s < 1.0));
    }

    #[test]
    fn test_causal_mask() {
        let mask = causal_mask(3, &Device::Cpu).unwrap();
        let rows: Vec<Vec<u8>> = mask.to_vec2().unwrap();
        assert_eq!(rows, vec![vec![0, 1, 1], vec![0, 0, 1], vec![0, 0, 0]]);
    }

    #[test]
    fn test_tiny_model_forward_shape() {
        let cfg = Config {
            vocab_size: 11,
            hidden_size: 8,
            n_layer: 2,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
            apply_residual_connection_post_layernorm: false,
        };
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Model::load(&cfg, vb).unwrap();

        let input = Tensor::new(&[[1u32, 4, 7]], &Device::Cpu).unwrap();
        let logits = model.forward(&input).unwrap();

        assert_eq!(logits.dims(), &[1, 11]);
    }
}
