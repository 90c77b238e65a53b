//! # mixtrain-model — Model-Construction Contract
//!
//! The transformer itself is an external collaborator (architecture,
//! tensor-parallel layers, and weights all live elsewhere). This crate pins
//! down the contract it is consumed through:
//!
//! * **[`gpt_layer_spec`]** — the one architectural decision made here:
//!   dense MLP or sparse mixture-of-experts (with the grouped-GEMM flag).
//! * **[`ModelArgs`]** / **[`ModelBuilder`]** / **[`build_model`]** — the
//!   construction seam: arguments assembled from the run options, handed to
//!   an external builder.
//! * **[`CausalLm`]** — the forward call the training pipeline makes.
//! * **[`ModelKind`]** — the model-type tag registered with the trainer.

pub mod factory;
pub mod spec;

pub use factory::{build_model, CausalLm, ModelArgs, ModelBuilder, ModelKind};
pub use spec::{gpt_layer_spec, LayerSpec, MlpFlavor};
