//! Masked-mean language-modeling loss and its data-parallel reduction.
//!
//! The model returns an unreduced per-token loss; [`masked_mean`] collapses
//! it over exactly the supervised positions. [`PendingLoss`] is the deferred
//! half: it captures a step's loss mask and the replica-group handle at
//! forward time, and the external trainer calls
//! [`finalize`](PendingLoss::finalize) once the right pipeline stage has the
//! output tensor.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use candle_core::{DType, Tensor};

use crate::comm::ReplicaGroup;

/// Key under which the averaged loss is reported.
pub const LM_LOSS_KEY: &str = "lm loss";

/// `sum(losses · mask) / sum(mask)` over the flattened batch, in F32.
///
/// Stays differentiable: the result is a graph node over `losses`. An
/// all-zero mask means the batch carries no supervision at all, which is a
/// caller-configuration error, not a zero loss.
pub fn masked_mean(losses: &Tensor, loss_mask: &Tensor) -> Result<Tensor> {
    let losses = losses.to_dtype(DType::F32)?.flatten_all()?;
    let mask = loss_mask.to_dtype(DType::F32)?.flatten_all()?;
    let denom = mask.sum_all()?.to_scalar::<f32>()?;
    if denom <= 0.0 {
        bail!("loss mask sums to zero: the batch has no supervised positions");
    }
    let sum = losses.mul(&mask)?.sum_all()?;
    Ok(sum.affine(1.0 / denom as f64, 0.0)?)
}

/// The two halves of one step's loss: the local differentiable scalar for
/// the backward pass, and the detached cross-replica average for telemetry.
#[derive(Debug)]
pub struct LossOutput {
    pub loss: Tensor,
    pub report: HashMap<&'static str, f64>,
}

/// A step's loss computation, deferred until the trainer reaches the
/// reduction phase.
pub struct PendingLoss {
    loss_mask: Tensor,
    replica: Arc<dyn ReplicaGroup>,
}

impl PendingLoss {
    pub fn new(loss_mask: Tensor, replica: Arc<dyn ReplicaGroup>) -> Self {
        Self { loss_mask, replica }
    }

    /// Reduce the model's per-token output against the captured mask, then
    /// average the scalar across the data-parallel group. Every replica
    /// contributes its masked mean with equal weight, whatever its valid
    /// token count. Blocks until the whole group has contributed.
    pub fn finalize(&self, output_tensor: &Tensor) -> Result<LossOutput> {
        let loss = masked_mean(output_tensor, &self.loss_mask)?;
        let local = loss.to_scalar::<f32>()? as f64;
        if !local.is_finite() {
            bail!("local lm loss is not finite: {local}");
        }
        let averaged = self.replica.all_reduce_mean(local)?;
        let mut report = HashMap::new();
        report.insert(LM_LOSS_KEY, averaged);
        Ok(LossOutput { loss, report })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
