//! # mixtrain-train — The Batch-to-Loss Pipeline
//!
//! The glue between a raw token stream and a scalar language-modeling loss,
//! one training step at a time:
//!
//! * **[`comm`]** — the collective seams: [`ShardGroup`] broadcast of raw
//!   batches, [`ReplicaGroup`] scalar averaging, with in-process
//!   implementations for single-node SPMD tests.
//! * **[`masks`]** — boundary-aware causal masks and position ids.
//! * **[`batch`]** — [`next_training_batch`]: broadcast, causal shift,
//!   pad-comparison attention mask, mask derivation.
//! * **[`loss`]** — [`masked_mean`] and the deferred [`PendingLoss`] with its
//!   data-parallel average.
//! * **[`step`]** — [`ForwardStep`]: the per-step unit of work handed to the
//!   external trainer.
//!
//! The trainer's outer loop, backward pass, optimiser, checkpointing, and
//! real multi-node collectives all live outside this workspace.

pub mod batch;
pub mod comm;
pub mod loss;
pub mod masks;
pub mod step;

pub use batch::{next_training_batch, TrainingBatch};
pub use comm::{
    LocalReplicaGroup, LocalShardGroup, ReplicaGroup, ShardGroup, SingleProcess, TokenFrame,
};
pub use loss::{masked_mean, LossOutput, PendingLoss, LM_LOSS_KEY};
pub use masks::{ltor_masks_and_position_ids, DerivedMasks, MaskPolicy};
pub use step::ForwardStep;
