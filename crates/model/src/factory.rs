//! Model factory: the construction and forward seams.
//!
//! [`ModelArgs`] is the full argument set an external builder receives; it is
//! assembled once from the validated run options. [`build_model`] resolves
//! the layer spec first, so a misconfigured mixture-of-experts run fails here,
//! before any training step executes.

use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::info;

use mixtrain_common::{PositionEmbedding, PretrainOptions};

use crate::spec::{gpt_layer_spec, LayerSpec, MlpFlavor};

// ── Forward contract ────────────────────────────────────────────────────────

/// A causal language model as the pipeline sees it: one call producing the
/// per-token unreduced loss, shape `(batch, seq_len)`.
///
/// The call may internally suspend across pipeline-parallel stages; that is
/// opaque to the caller. Errors propagate unmodified.
pub trait CausalLm {
    fn forward_loss(
        &self,
        tokens: &Tensor,
        position_ids: &Tensor,
        attention_mask: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor>;
}

/// Model-type tag registered with the external trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    EncoderOrDecoder,
}

// ── Construction arguments ──────────────────────────────────────────────────

/// Everything an external builder needs besides the layer spec.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArgs {
    pub vocab_size: usize,
    pub max_sequence_length: usize,
    /// Build the embedding stage of a pipeline-split model.
    pub pre_process: bool,
    /// Build the output-head stage of a pipeline-split model.
    pub post_process: bool,
    pub fp16_lm_cross_entropy: bool,
    pub parallel_output: bool,
    pub share_embeddings_and_output_weights: bool,
    pub position_embedding_type: PositionEmbedding,
    pub rotary_percent: f32,
}

impl ModelArgs {
    /// Assemble the builder arguments from the run options and the
    /// tokeniser's vocabulary size. A single-stage model owns both the
    /// embedding and the output head.
    pub fn from_options(options: &PretrainOptions, vocab_size: usize) -> Self {
        Self {
            vocab_size,
            max_sequence_length: options.max_position_embeddings,
            pre_process: true,
            post_process: true,
            fp16_lm_cross_entropy: options.fp16_lm_cross_entropy,
            parallel_output: options.parallel_output,
            share_embeddings_and_output_weights: !options.untie_embeddings_and_output_weights,
            position_embedding_type: options.position_embedding_type,
            rotary_percent: options.rotary_percent,
        }
    }
}

/// External model builder: the only implementation lives outside this
/// workspace (the in-repo tests and example provide toy ones).
pub trait ModelBuilder {
    fn build(&self, args: &ModelArgs, spec: &LayerSpec, device: &Device)
        -> Result<Box<dyn CausalLm>>;
}

/// Resolve the layer spec and arguments from the run options and hand them
/// to `builder`.
pub fn build_model(
    builder: &dyn ModelBuilder,
    options: &PretrainOptions,
    vocab_size: usize,
    device: &Device,
) -> Result<Box<dyn CausalLm>> {
    let spec = gpt_layer_spec(options.num_experts, options.moe_grouped_gemm)?;
    let args = ModelArgs::from_options(options, vocab_size);
    let model = builder.build(&args, &spec, device)?;
    let num_experts = match spec.mlp {
        MlpFlavor::Dense => 0,
        MlpFlavor::SparseMoe { num_experts, .. } => num_experts,
    };
    info!(
        vocab_size = args.vocab_size,
        max_sequence_length = args.max_sequence_length,
        num_experts,
        parallel_output = args.parallel_output,
        "built model"
    );
    Ok(model)
}

// ── Tests ───────────────────────────────────────────────────────────────────
