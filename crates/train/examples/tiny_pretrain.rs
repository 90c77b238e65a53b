//! Single-process wiring demo: a JSONL corpus, a word-level tokeniser, and
//! the full batch-to-loss pipeline with a toy uniform model standing in for
//! the external transformer.
//!
//! ```sh
//! cargo run --example tiny_pretrain
//! ```

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use mixtrain_common::{build_train_valid_test, PretrainOptions, TokenizerAdapter};
use mixtrain_model::{build_model, CausalLm, LayerSpec, ModelArgs, ModelBuilder};
use mixtrain_train::{ForwardStep, MaskPolicy, SingleProcess, LM_LOSS_KEY};
use tracing::info;

/// Uniform logits over the vocabulary: every supervised token costs
/// `ln(vocab)`. Stands in for the external Mixtral-style transformer.
struct UniformLm {
    vocab: usize,
}

impl CausalLm for UniformLm {
    fn forward_loss(
        &self,
        tokens: &Tensor,
        _position_ids: &Tensor,
        _attention_mask: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor> {
        let (b, s) = tokens.dims2()?;
        let logits = Tensor::zeros((b, s, self.vocab), DType::F32, tokens.device())?;
        let logp = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let picked = logp.gather(&labels.unsqueeze(2)?, 2)?.squeeze(2)?;
        Ok(picked.neg()?)
    }
}

struct UniformBuilder;

impl ModelBuilder for UniformBuilder {
    fn build(
        &self,
        args: &ModelArgs,
        _spec: &LayerSpec,
        _device: &Device,
    ) -> Result<Box<dyn CausalLm>> {
        Ok(Box::new(UniformLm {
            vocab: args.vocab_size,
        }))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // A tiny corpus: one document per line.
    let dir = tempfile::tempdir()?;
    let corpus_path = dir.path().join("corpus.jsonl");
    let mut file = std::fs::File::create(&corpus_path)?;
    for line in [
        r#"{"text": "the cat sat on the mat"}"#,
        r#"{"text": "the dog sat on the cat"}"#,
        r#"{"text": "the mat sat on the dog"}"#,
        r#"{"text": "a cat and a dog"}"#,
    ] {
        writeln!(file, "{line}")?;
    }

    let options = PretrainOptions {
        data_paths: vec![corpus_path],
        max_padding_length: 9,
        micro_batch_size: 2,
        num_experts: Some(8),
        ..Default::default()
    };
    let kind = options.validate()?;
    info!(?kind, seq_len = options.sequence_length(), "configured run");

    let tokenizer = TokenizerAdapter::word_level(
        &["the", "cat", "sat", "on", "mat", "dog", "a", "and"],
        "<pad>",
        "<eod>",
    )?;
    let sets = build_train_valid_test(&options, kind, &tokenizer, [0, 0, 0])?;

    let device = Device::Cpu;
    let model = build_model(&UniformBuilder, &options, tokenizer.vocab_size(), &device)?;
    let step = ForwardStep::new(
        model.as_ref(),
        &SingleProcess,
        Arc::new(SingleProcess),
        MaskPolicy::from_options(&options),
        tokenizer.pad_token_id(),
        device.clone(),
    );

    let mut iter = sets.train.batches(options.micro_batch_size, &device);
    let (output, pending) = step.forward(Some(&mut iter))?;
    let out = pending.finalize(&output)?;
    info!(
        lm_loss = out.report[LM_LOSS_KEY],
        uniform = (tokenizer.vocab_size() as f64).ln(),
        "one training step"
    );
    Ok(())
}
