//! Run configuration for a pretraining job.
//!
//! Serialised as JSON so a run can be reproduced from the file alone. Built
//! once at process start, validated, then passed by reference into every
//! component constructor; nothing in the workspace reads configuration from
//! anywhere else. Backwards-compatible: missing fields fall back to their
//! `#[serde(default)]` values.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Options for one pretraining run.
///
/// Field groups mirror the surfaces they feed: the corpus builders, the
/// mask-derivation policy, the mixture-of-experts layer spec, and the model
/// factory. [`validate`](Self::validate) checks the lot and decides the
/// [`CorpusKind`] exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainOptions {
    // ── Corpus ──────────────────────────────────────────────────────────────
    /// Corpus locations. Either a single raw-text/JSONL file (first entry is
    /// an existing file) or a set of indexed-shard path prefixes (`{p}.bin` +
    /// `{p}.idx`).
    pub data_paths: Vec<PathBuf>,
    /// Relative train/valid/test proportions, e.g. `"949,50,1"`.
    #[serde(default = "default_split")]
    pub split: String,
    /// Width of one raw sample row in tokens. The causal shift consumes one
    /// column, so the training sequence length is `max_padding_length - 1`.
    #[serde(default = "default_max_padding_length")]
    pub max_padding_length: usize,
    /// Rows per [`RawBatch`](crate::data::RawBatch).
    #[serde(default = "default_micro_batch_size")]
    pub micro_batch_size: usize,
    /// Dataset-family tag recorded on built corpora (log/telemetry only).
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Touch every mapped page of an indexed shard at open time instead of
    /// faulting lazily during the first epoch.
    #[serde(default)]
    pub mmap_warmup: bool,
    /// `tokenizer.json` to load; `None` when the caller supplies a tokeniser
    /// built in memory.
    #[serde(default)]
    pub tokenizer_file: Option<PathBuf>,

    // ── Mask policy ─────────────────────────────────────────────────────────
    /// Restart position ids at 0 after each document boundary token.
    #[serde(default)]
    pub reset_position_ids: bool,
    /// Block attention across document boundaries (block-diagonal causal).
    #[serde(default)]
    pub reset_attention_mask: bool,

    // ── Mixture of experts ──────────────────────────────────────────────────
    /// Experts per MoE layer. `None` selects a dense MLP.
    #[serde(default)]
    pub num_experts: Option<usize>,
    /// Use grouped GEMM for expert computation.
    #[serde(default)]
    pub moe_grouped_gemm: bool,

    // ── Model surface ───────────────────────────────────────────────────────
    /// Maximum sequence length the model is built for.
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// Compute the LM cross-entropy in fp16 instead of upcasting to fp32.
    #[serde(default)]
    pub fp16_lm_cross_entropy: bool,
    /// Keep the output logits sharded across tensor-parallel ranks.
    #[serde(default = "default_true")]
    pub parallel_output: bool,
    /// Give the output projection its own weights instead of tying it to the
    /// input embedding.
    #[serde(default)]
    pub untie_embeddings_and_output_weights: bool,
    /// Positional-encoding flavour.
    #[serde(default)]
    pub position_embedding_type: PositionEmbedding,
    /// Fraction of head dimensions rotated by RoPE.
    #[serde(default = "default_rotary_percent")]
    pub rotary_percent: f32,

    // ── Determinism ─────────────────────────────────────────────────────────
    /// Seed for split sample ordering. Identical options + seed reproduce
    /// identical split membership and order.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_split() -> String {
    "949,50,1".to_string()
}
fn default_max_padding_length() -> usize {
    2048
}
fn default_micro_batch_size() -> usize {
    1
}
fn default_dataset() -> String {
    "pretrain".to_string()
}
fn default_max_position_embeddings() -> usize {
    4096
}
fn default_true() -> bool {
    true
}
fn default_rotary_percent() -> f32 {
    1.0
}
fn default_seed() -> u64 {
    1234
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl Default for PretrainOptions {
    fn default() -> Self {
        Self {
            data_paths: Vec::new(),
            split: default_split(),
            max_padding_length: 2048,
            micro_batch_size: 1,
            dataset: default_dataset(),
            mmap_warmup: false,
            tokenizer_file: None,
            reset_position_ids: false,
            reset_attention_mask: false,
            num_experts: None,
            moe_grouped_gemm: false,
            max_position_embeddings: 4096,
            fp16_lm_cross_entropy: false,
            parallel_output: true,
            untie_embeddings_and_output_weights: false,
            position_embedding_type: PositionEmbedding::Rope,
            rotary_percent: 1.0,
            seed: 1234,
        }
    }
}

impl PretrainOptions {
    /// Training sequence length: the raw row width minus the column the
    /// causal shift consumes.
    pub fn sequence_length(&self) -> usize {
        self.max_padding_length.saturating_sub(1)
    }

    /// Check every field and decide the corpus kind.
    ///
    /// The filesystem probe happens here and only here: an existing regular
    /// file as the first entry selects [`CorpusKind::Original`], anything
    /// else is treated as a set of indexed-shard prefixes. Callers thread the
    /// returned kind through; it is never re-derived per call.
    pub fn validate(&self) -> Result<CorpusKind> {
        if self.data_paths.is_empty() {
            bail!("data_paths is empty: at least one corpus file or shard prefix is required");
        }
        if self.max_padding_length < 2 {
            bail!(
                "max_padding_length must be at least 2 so one column can shift off, got {}",
                self.max_padding_length
            );
        }
        if self.micro_batch_size == 0 {
            bail!("micro_batch_size must be at least 1");
        }
        parse_split_ratios(&self.split)?;
        if !(self.rotary_percent > 0.0 && self.rotary_percent <= 1.0) {
            bail!(
                "rotary_percent must be in (0, 1], got {}",
                self.rotary_percent
            );
        }
        if self.data_paths[0].is_file() {
            Ok(CorpusKind::Original)
        } else {
            Ok(CorpusKind::Indexed)
        }
    }

    /// Save options to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load options from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let options = serde_json::from_str(&json)?;
        Ok(options)
    }
}

/// Which corpus builder a run uses.
///
/// Decided once by [`PretrainOptions::validate`] and threaded explicitly into
/// the dataset builders; train/valid/test share it for the run's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusKind {
    /// The first data path is an existing file: the whole file is the dataset.
    Original,
    /// Data paths are `{prefix}.bin` / `{prefix}.idx` shard prefixes.
    Indexed,
}

/// Positional-encoding flavour requested from the model builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEmbedding {
    #[default]
    Rope,
    LearnedAbsolute,
}

/// Parse a relative train/valid/test proportion string into normalised
/// fractions summing to 1.
///
/// Fewer than three components are padded with zeros (`"90,10"` means no test
/// split); more than three is an error, as is a zero or negative total.
pub fn parse_split_ratios(split: &str) -> Result<[f64; 3]> {
    if split.trim().is_empty() {
        bail!("split string is empty");
    }
    let mut weights = Vec::with_capacity(3);
    for part in split.split(',') {
        let part = part.trim();
        let w: f64 = part
            .parse()
            .with_context(|| format!("split component {part:?} is not a number"))?;
        if w < 0.0 {
            bail!("split component {w} is negative");
        }
        weights.push(w);
    }
    if weights.len() > 3 {
        bail!("split string {split:?} has more than three components");
    }
    while weights.len() < 3 {
        weights.push(0.0);
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        bail!("split ratios sum to zero: {split:?}");
    }
    Ok([
        weights[0] / total,
        weights[1] / total,
        weights[2] / total,
    ])
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_json_round_trip() {
        let options = PretrainOptions {
            data_paths: vec![PathBuf::from("corpus/shard-a")],
            num_experts: Some(8),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        let loaded: PretrainOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.data_paths, options.data_paths);
        assert_eq!(loaded.num_experts, Some(8));
        assert_eq!(loaded.split, "949,50,1");
        assert_eq!(loaded.seed, 1234);
    }

    #[test]
    fn backward_compat_missing_fields() {
        // A minimal JSON: only the corpus location.
        let old_json = r#"{ "data_paths": ["data/shard"] }"#;
        let loaded: PretrainOptions = serde_json::from_str(old_json).unwrap();
        assert_eq!(loaded.max_padding_length, 2048);
        assert!(loaded.parallel_output);
        assert!(!loaded.reset_position_ids);
        assert_eq!(loaded.position_embedding_type, PositionEmbedding::Rope);
        assert_eq!(loaded.rotary_percent, 1.0);
        assert_eq!(loaded.num_experts, None);
    }

    #[test]
    fn split_ratios_normalise() {
        let r = parse_split_ratios("949,50,1").unwrap();
        assert!((r[0] - 0.949).abs() < 1e-12);
        assert!((r[1] - 0.050).abs() < 1e-12);
        assert!((r[2] - 0.001).abs() < 1e-12);

        // Short strings pad with zeros.
        let r = parse_split_ratios("90,10").unwrap();
        assert_eq!(r, [0.9, 0.1, 0.0]);
    }

    #[test]
    fn split_ratios_reject_malformed() {
        assert!(parse_split_ratios("").is_err());
        assert!(parse_split_ratios("a,b,c").is_err());
        assert!(parse_split_ratios("0,0,0").is_err());
        assert!(parse_split_ratios("1,2,3,4").is_err());
        assert!(parse_split_ratios("1,-1,0").is_err());
    }

    #[test]
    fn validate_rejects_bad_options() {
        let err = PretrainOptions::default().validate().unwrap_err();
        assert!(err.to_string().contains("data_paths"));

        let err = PretrainOptions {
            data_paths: vec![PathBuf::from("x")],
            max_padding_length: 1,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("max_padding_length"));

        let err = PretrainOptions {
            data_paths: vec![PathBuf::from("x")],
            rotary_percent: 0.0,
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("rotary_percent"));
    }

    #[test]
    fn validate_decides_corpus_kind_from_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("corpus.jsonl");
        std::fs::write(&file, "{\"text\": \"hello\"}\n").unwrap();

        let kind = PretrainOptions {
            data_paths: vec![file],
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(kind, CorpusKind::Original);

        // Shard prefixes do not name an existing file.
        let kind = PretrainOptions {
            data_paths: vec![dir.path().join("shard")],
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(kind, CorpusKind::Indexed);
    }

    #[test]
    fn sequence_length_is_one_less_than_row_width() {
        let options = PretrainOptions {
            max_padding_length: 9,
            ..Default::default()
        };
        assert_eq!(options.sequence_length(), 8);
    }
}
