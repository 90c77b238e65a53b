//! Layer specification for the decoder stack.
//!
//! The only architectural decision this glue makes is the MLP flavour: dense
//! or sparse mixture-of-experts (with the grouped-GEMM execution flag). The
//! external model builder owns everything else about the layer.

use anyhow::{bail, Result};

/// MLP flavour selected by the layer specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlpFlavor {
    Dense,
    SparseMoe {
        num_experts: usize,
        grouped_gemm: bool,
    },
}

/// Per-layer module selection handed to the model builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub mlp: MlpFlavor,
}

/// Layer spec for a GPT decoder stack: dense MLP when `num_experts` is
/// `None`, sparse mixture-of-experts otherwise.
///
/// `Some(0)` is a configuration error — a MoE run with zero experts has no
/// meaningful layer — and fails here, before any model is built or any step
/// runs.
pub fn gpt_layer_spec(num_experts: Option<usize>, moe_grouped_gemm: bool) -> Result<LayerSpec> {
    let mlp = match num_experts {
        None => MlpFlavor::Dense,
        Some(0) => bail!("num_experts must be at least 1 for a mixture-of-experts layer, got 0"),
        Some(n) => MlpFlavor::SparseMoe {
            num_experts: n,
            grouped_gemm: moe_grouped_gemm,
        },
    };
    Ok(LayerSpec { mlp })
}

// ── Tests ───────────────────────────────────────────────────────────────────
