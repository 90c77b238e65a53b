//! Forward-step adapter: the unit of work the external trainer invokes.
//!
//! One call is fetch → forward → pending loss. The trainer owns everything
//! around it: the backward pass, the optimiser, micro-batch scheduling, and
//! the decision of when to [`finalize`](crate::loss::PendingLoss::finalize)
//! the loss. Errors from the fetch or the forward propagate unmodified; this
//! layer never retries.

use std::sync::Arc;

use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::debug_span;

use mixtrain_common::RawBatch;
use mixtrain_model::CausalLm;

use crate::batch::next_training_batch;
use crate::comm::{ReplicaGroup, ShardGroup};
use crate::loss::PendingLoss;
use crate::masks::MaskPolicy;

/// One rank's forward step, bound to its model and collective groups.
pub struct ForwardStep<'a> {
    model: &'a dyn CausalLm,
    shard: &'a dyn ShardGroup,
    replica: Arc<dyn ReplicaGroup>,
    policy: MaskPolicy,
    pad_token_id: i64,
    device: Device,
}

impl<'a> ForwardStep<'a> {
    pub fn new(
        model: &'a dyn CausalLm,
        shard: &'a dyn ShardGroup,
        replica: Arc<dyn ReplicaGroup>,
        policy: MaskPolicy,
        pad_token_id: i64,
        device: Device,
    ) -> Self {
        Self {
            model,
            shard,
            replica,
            policy,
            pad_token_id,
            device,
        }
    }

    /// Run one step: construct the batch (blocking on the group broadcast),
    /// call the model, and return its per-token output together with the
    /// loss computation deferred for the trainer's reduction phase.
    pub fn forward(
        &self,
        data_iter: Option<&mut dyn Iterator<Item = Result<RawBatch>>>,
    ) -> Result<(Tensor, PendingLoss)> {
        let batch = {
            let _span = debug_span!("batch_generator").entered();
            next_training_batch(
                data_iter,
                self.shard,
                self.pad_token_id,
                &self.policy,
                &self.device,
            )?
        };
        let output_tensor = self.model.forward_loss(
            &batch.tokens,
            &batch.position_ids,
            &batch.attention_mask,
            &batch.labels,
        )?;
        Ok((
            output_tensor,
            PendingLoss::new(batch.loss_mask, Arc::clone(&self.replica)),
        ))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use crate::loss::LM_LOSS_KEY;

    const PAD: i64 = 0;

    /// Per-token loss equal to the label value, cast to F32.
    struct EchoLabels;

    impl CausalLm for EchoLabels {
        fn forward_loss(
            &self,
            tokens: &Tensor,
            position_ids: &Tensor,
            attention_mask: &Tensor,
            labels: &Tensor,
        ) -> Result<Tensor> {
            assert_eq!(tokens.dims(), labels.dims());
            assert_eq!(tokens.dims(), position_ids.dims());
            assert_eq!(tokens.dims(), attention_mask.dims());
            Ok(labels.to_dtype(candle_core::DType::F32)?)
        }
    }

    #[test]
    fn forward_returns_output_and_a_finalizable_loss() {
        let input_ids =
            Tensor::from_vec(vec![3i64, 1, 5, PAD, PAD], (1, 5), &Device::Cpu).unwrap();
        let mut iter = std::iter::once(Ok(RawBatch { input_ids }));

        let model = EchoLabels;
        let step = ForwardStep::new(
            &model,
            &SingleProcess,
            Arc::new(SingleProcess),
            MaskPolicy {
                reset_position_ids: false,
                reset_attention_mask: false,
                mask_boundary_loss: true,
            },
            PAD,
            Device::Cpu,
        );
        let (output, pending) = step.forward(Some(&mut iter)).unwrap();

        // tokens [3,1,5,PAD] → labels [1,5,PAD,PAD], loss mask [1,1,1,0].
        assert_eq!(output.dims(), &[1, 4]);
        let out = pending.finalize(&output).unwrap();
        let expect = (1.0 + 5.0 + 0.0) / 3.0;
        assert!((out.loss.to_scalar::<f32>().unwrap() - expect as f32).abs() < 1e-6);
        assert!((out.report[LM_LOSS_KEY] - expect).abs() < 1e-6);
    }

    #[test]
    fn fetch_errors_propagate_to_the_caller() {
        let model = EchoLabels;
        let step = ForwardStep::new(
            &model,
            &SingleProcess,
            Arc::new(SingleProcess),
            MaskPolicy {
                reset_position_ids: false,
                reset_attention_mask: false,
                mask_boundary_loss: true,
            },
            PAD,
            Device::Cpu,
        );
        let mut iter = std::iter::empty();
        assert!(step.forward(Some(&mut iter)).is_err());
    }
}
