//! Left-to-right masks and position ids.
//!
//! Corpora concatenate documents into fixed-width rows, separated by a
//! boundary token. [`ltor_masks_and_position_ids`] derives the three
//! boundary-aware artifacts from a token batch: a causal attention mask
//! (optionally block-diagonal per document), a loss mask (optionally zeroed
//! on the boundary token itself), and position ids (optionally restarting
//! after each boundary). The masks are assembled as flat row buffers and
//! finalised into tensors once.

use anyhow::Result;
use candle_core::Tensor;

use mixtrain_common::PretrainOptions;

// ── Policy ──────────────────────────────────────────────────────────────────

/// Which boundary-aware adjustments to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskPolicy {
    /// Restart position ids at 0 immediately after each boundary token.
    pub reset_position_ids: bool,
    /// Block attention across document boundaries (block-diagonal causal).
    pub reset_attention_mask: bool,
    /// Exclude the boundary token itself from the loss.
    pub mask_boundary_loss: bool,
}

impl MaskPolicy {
    /// Policy for a run: the reset flags come from the options, boundary
    /// tokens are always excluded from the loss.
    pub fn from_options(options: &PretrainOptions) -> Self {
        Self {
            reset_position_ids: options.reset_position_ids,
            reset_attention_mask: options.reset_attention_mask,
            mask_boundary_loss: true,
        }
    }
}

/// The three derived artifacts. The batch constructor keeps `loss_mask` and
/// `position_ids`; `attention_mask` is redundant with the pad-comparison
/// mask computed separately there, and is dropped by that caller.
#[derive(Debug, Clone)]
pub struct DerivedMasks {
    /// Causal mask, U8. `(1, 1, s, s)` shared by every row, or `(b, 1, s, s)`
    /// when attention resets at document boundaries.
    pub attention_mask: Tensor,
    /// `(b, s)` F32 in {0, 1}.
    pub loss_mask: Tensor,
    /// `(b, s)` I64.
    pub position_ids: Tensor,
}

// ── Derivation ──────────────────────────────────────────────────────────────

/// Derive causal attention mask, loss mask, and position ids for one token
/// batch. `boundary_id` is the document-terminator token.
pub fn ltor_masks_and_position_ids(
    tokens: &Tensor,
    boundary_id: i64,
    policy: &MaskPolicy,
) -> Result<DerivedMasks> {
    let (b, s) = tokens.dims2()?;
    let device = tokens.device();
    let rows = tokens.to_vec2::<i64>()?;

    let mut loss = vec![1f32; b * s];
    if policy.mask_boundary_loss {
        for (r, row) in rows.iter().enumerate() {
            for (i, &t) in row.iter().enumerate() {
                if t == boundary_id {
                    loss[r * s + i] = 0.0;
                }
            }
        }
    }
    let loss_mask = Tensor::from_vec(loss, (b, s), device)?;

    let mut pos = vec![0i64; b * s];
    for (r, row) in rows.iter().enumerate() {
        if policy.reset_position_ids {
            let mut p = 0i64;
            for (i, &t) in row.iter().enumerate() {
                pos[r * s + i] = p;
                // The boundary token keeps its running position; the next
                // token starts a new document at 0.
                p = if t == boundary_id { 0 } else { p + 1 };
            }
        } else {
            for (i, slot) in pos[r * s..(r + 1) * s].iter_mut().enumerate() {
                *slot = i as i64;
            }
        }
    }
    let position_ids = Tensor::from_vec(pos, (b, s), device)?;

    let causal: Vec<u8> = (0..s)
        .flat_map(|i| (0..s).map(move |j| u8::from(j <= i)))
        .collect();
    let attention_mask = if policy.reset_attention_mask {
        let mut att = Vec::with_capacity(b * s * s);
        for row in &rows {
            let mut block = causal.clone();
            for (k, &t) in row.iter().enumerate() {
                if t == boundary_id {
                    // Nothing after the boundary attends to it or before it.
                    for i in (k + 1)..s {
                        for cell in &mut block[i * s..i * s + k + 1] {
                            *cell = 0;
                        }
                    }
                }
            }
            att.extend_from_slice(&block);
        }
        Tensor::from_vec(att, (b, 1, s, s), device)?
    } else {
        Tensor::from_vec(causal, (1, 1, s, s), device)?
    };

    Ok(DerivedMasks {
        attention_mask,
        loss_mask,
        position_ids,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
