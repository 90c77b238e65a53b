//! Corpora and batching for the pretraining pipeline.
//!
//! Two corpus kinds behind one row surface, selected once at configuration
//! validation:
//!
//! * **[`OriginalCorpus`]** — a single raw-text/JSONL file; the whole file is
//!   the dataset and every split shares it.
//! * **[`IndexedCorpus`]** — pre-tokenised `.bin`/`.idx` shards with random
//!   document access via `memmap2`.
//!
//! [`build_train_valid_test`] plans split membership and sample order (both
//! deterministic in the seed); each [`SplitDataset`] yields fixed-width
//! [`RawBatch`] tensors through [`BatchIter`].

pub mod indexed;
pub mod original;
pub mod splits;

use std::ops::Range;
use std::sync::Arc;

use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::info;

use crate::config::{parse_split_ratios, CorpusKind, PretrainOptions};
use crate::tokenizer::TokenizerAdapter;

pub use indexed::{write_indexed_shard, IndexedCorpus, IndexedShard};
pub use original::OriginalCorpus;

use splits::{sample_order, split_doc_ranges};

// ── RawBatch ────────────────────────────────────────────────────────────────

/// One fetched batch of raw rows: `(batch, max_padding_length)` i64 token
/// ids. Consumed exactly once per training step by the batch constructor,
/// which shifts one column off to form tokens and labels.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub input_ids: Tensor,
}

// ── Corpus ──────────────────────────────────────────────────────────────────

/// Either corpus kind behind the common row surface.
#[derive(Debug)]
pub enum Corpus {
    Original(OriginalCorpus),
    Indexed(IndexedCorpus),
}

impl Corpus {
    pub fn kind(&self) -> CorpusKind {
        match self {
            Corpus::Original(_) => CorpusKind::Original,
            Corpus::Indexed(_) => CorpusKind::Indexed,
        }
    }

    pub fn doc_count(&self) -> usize {
        match self {
            Corpus::Original(c) => c.doc_count(),
            Corpus::Indexed(c) => c.doc_count(),
        }
    }

    pub fn row_width(&self) -> usize {
        match self {
            Corpus::Original(c) => c.row_width(),
            Corpus::Indexed(c) => c.row_width(),
        }
    }

    /// Fixed-width token row for one document.
    pub fn padded_row(&self, doc: u64) -> Result<Vec<i64>> {
        match self {
            Corpus::Original(c) => c.padded_row(doc),
            Corpus::Indexed(c) => c.padded_row(doc),
        }
    }
}

// ── Splits ──────────────────────────────────────────────────────────────────

/// One split's view of a corpus: a deterministic document order.
#[derive(Debug)]
pub struct SplitDataset {
    corpus: Arc<Corpus>,
    order: Vec<u64>,
    name: &'static str,
}

impl SplitDataset {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of samples in this split's order.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Document order, exposed for determinism checks.
    pub fn order(&self) -> &[u64] {
        &self.order
    }

    /// Padded row for the `i`-th sample in this split's order.
    pub fn row(&self, i: usize) -> Result<Vec<i64>> {
        let doc = self.order.get(i).ok_or_else(|| {
            anyhow::anyhow!(
                "sample index {i} out of range in {} split ({} samples)",
                self.name,
                self.order.len()
            )
        })?;
        self.corpus.padded_row(*doc)
    }

    /// Iterate fixed-size raw batches on `device`. A ragged tail is dropped.
    pub fn batches(&self, batch_size: usize, device: &Device) -> BatchIter<'_> {
        BatchIter {
            split: self,
            batch_size,
            device: device.clone(),
            cursor: 0,
        }
    }
}

/// Iterator over the [`RawBatch`]es of one split.
pub struct BatchIter<'a> {
    split: &'a SplitDataset,
    batch_size: usize,
    device: Device,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<RawBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 0 || self.cursor + self.batch_size > self.split.len() {
            return None;
        }
        let width = self.split.corpus().row_width();
        let mut flat = Vec::with_capacity(self.batch_size * width);
        for i in self.cursor..self.cursor + self.batch_size {
            match self.split.row(i) {
                Ok(row) => flat.extend_from_slice(&row),
                Err(e) => return Some(Err(e)),
            }
        }
        self.cursor += self.batch_size;
        match Tensor::from_vec(flat, (self.batch_size, width), &self.device) {
            Ok(input_ids) => Some(Ok(RawBatch { input_ids })),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// The three planned splits of one corpus.
#[derive(Debug)]
pub struct TrainValTest {
    pub train: SplitDataset,
    pub valid: SplitDataset,
    pub test: SplitDataset,
}

// ── Builders ────────────────────────────────────────────────────────────────

/// Build train/valid/test for the corpus kind decided at validation.
///
/// `sample_counts` are the per-split target sample counts; the whole-file
/// mode ignores them.
pub fn build_train_valid_test(
    options: &PretrainOptions,
    kind: CorpusKind,
    tokenizer: &TokenizerAdapter,
    sample_counts: [usize; 3],
) -> Result<TrainValTest> {
    match kind {
        CorpusKind::Original => build_from_original(options, tokenizer),
        CorpusKind::Indexed => {
            build_from_indexed(options, tokenizer.pad_token_id(), sample_counts)
        }
    }
}

/// Whole-file corpus: every split shares the file in natural document order.
pub fn build_from_original(
    options: &PretrainOptions,
    tokenizer: &TokenizerAdapter,
) -> Result<TrainValTest> {
    let path = &options.data_paths[0];
    let corpus = OriginalCorpus::from_file(path, tokenizer, options.max_padding_length)?;
    info!(
        dataset = %options.dataset,
        path = %path.display(),
        docs = corpus.doc_count(),
        "built whole-file corpus; per-split sample counts ignored"
    );
    let corpus = Arc::new(Corpus::Original(corpus));
    let order: Vec<u64> = (0..corpus.doc_count() as u64).collect();
    Ok(TrainValTest {
        train: SplitDataset {
            corpus: Arc::clone(&corpus),
            order: order.clone(),
            name: "train",
        },
        valid: SplitDataset {
            corpus: Arc::clone(&corpus),
            order: order.clone(),
            name: "valid",
        },
        test: SplitDataset {
            corpus,
            order,
            name: "test",
        },
    })
}

/// Indexed corpus: shards opened from the configured prefixes, documents
/// partitioned by the split ratios, per-split order shuffled per epoch from
/// the seed.
pub fn build_from_indexed(
    options: &PretrainOptions,
    pad_token_id: i64,
    sample_counts: [usize; 3],
) -> Result<TrainValTest> {
    let fractions = parse_split_ratios(&options.split)?;
    let corpus = IndexedCorpus::open(
        &options.data_paths,
        options.max_padding_length,
        pad_token_id,
        options.mmap_warmup,
    )?;
    let ranges = split_doc_ranges(corpus.doc_count(), fractions);
    info!(
        dataset = %options.dataset,
        shards = options.data_paths.len(),
        docs = corpus.doc_count(),
        train_docs = ranges[0].len(),
        valid_docs = ranges[1].len(),
        test_docs = ranges[2].len(),
        "built indexed corpus"
    );
    let corpus = Arc::new(Corpus::Indexed(corpus));
    let make = |range: Range<usize>, samples: usize, name: &'static str| SplitDataset {
        corpus: Arc::clone(&corpus),
        order: sample_order(range, samples, options.seed),
        name,
    };
    Ok(TrainValTest {
        train: make(ranges[0].clone(), sample_counts[0], "train"),
        valid: make(ranges[1].clone(), sample_counts[1], "valid"),
        test: make(ranges[2].clone(), sample_counts[2], "test"),
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use std::io::Write;

    fn test_tokenizer() -> TokenizerAdapter {
        TokenizerAdapter::word_level(&["a", "b", "c", "d"], "<pad>", "<eod>").unwrap()
    }

    fn indexed_options(dir: &std::path::Path, n_docs: u32) -> PretrainOptions {
        let prefix = dir.join("shard");
        let docs: Vec<Vec<u32>> = (0..n_docs).map(|d| vec![d, d + 100, d + 200]).collect();
        write_indexed_shard(&prefix, &docs).unwrap();
        PretrainOptions {
            data_paths: vec![prefix],
            split: "8,1,1".to_string(),
            max_padding_length: 4,
            ..Default::default()
        }
    }

    #[test]
    fn whole_file_mode_shares_the_corpus_across_splits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in ["a b", "c d", "a c"] {
            writeln!(f, "{line}").unwrap();
        }
        let options = PretrainOptions {
            data_paths: vec![path],
            max_padding_length: 4,
            ..Default::default()
        };
        let kind = options.validate().unwrap();
        assert_eq!(kind, CorpusKind::Original);

        let tok = test_tokenizer();
        // Sample counts are ignored in this mode.
        let sets = build_train_valid_test(&options, kind, &tok, [99, 99, 99]).unwrap();
        assert_eq!(sets.train.len(), 3);
        assert_eq!(sets.valid.len(), 3);
        assert_eq!(sets.test.len(), 3);
        assert_eq!(sets.train.order(), &[0, 1, 2]);
        assert_eq!(sets.train.corpus().kind(), CorpusKind::Original);
    }

    #[test]
    fn indexed_mode_honours_counts_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let options = indexed_options(dir.path(), 20);
        let kind = options.validate().unwrap();
        assert_eq!(kind, CorpusKind::Indexed);

        let tok = test_tokenizer();
        let a = build_train_valid_test(&options, kind, &tok, [10, 4, 2]).unwrap();
        let b = build_train_valid_test(&options, kind, &tok, [10, 4, 2]).unwrap();
        assert_eq!(a.train.len(), 10);
        assert_eq!(a.valid.len(), 4);
        assert_eq!(a.test.len(), 2);
        // Same options + seed reproduce identical membership and order.
        assert_eq!(a.train.order(), b.train.order());
        assert_eq!(a.valid.order(), b.valid.order());
        assert_eq!(a.test.order(), b.test.order());
    }

    #[test]
    fn indexed_split_membership_is_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let options = indexed_options(dir.path(), 20);
        let tok = test_tokenizer();
        let sets = build_from_indexed(&options, tok.pad_token_id(), [40, 8, 4]).unwrap();

        // "8,1,1" over 20 docs: 16 train / 2 valid / 2 test.
        let in_range = |order: &[u64], lo: u64, hi: u64| {
            order.iter().all(|&d| d >= lo && d < hi)
        };
        assert!(in_range(sets.train.order(), 0, 16));
        assert!(in_range(sets.valid.order(), 16, 18));
        assert!(in_range(sets.test.order(), 18, 20));
    }

    #[test]
    fn missing_shard_prefix_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let options = PretrainOptions {
            data_paths: vec![dir.path().join("absent")],
            ..Default::default()
        };
        let err = build_from_indexed(&options, 0, [1, 1, 1]).unwrap_err();
        assert!(format!("{err:#}").contains("absent.idx"));
    }

    #[test]
    fn batches_are_fixed_width_i64_and_drop_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let options = indexed_options(dir.path(), 10);
        let tok = test_tokenizer();
        let sets = build_from_indexed(&options, tok.pad_token_id(), [7, 0, 0]).unwrap();

        let device = Device::Cpu;
        let batches: Vec<_> = sets
            .train
            .batches(2, &device)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // 7 samples at batch size 2: the seventh is dropped.
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.input_ids.dims(), &[2, 4]);
            assert_eq!(batch.input_ids.dtype(), DType::I64);
        }

        // Rows come out in split order.
        let first = batches[0].input_ids.to_vec2::<i64>().unwrap();
        assert_eq!(first[0], sets.train.row(0).unwrap());
        assert_eq!(first[1], sets.train.row(1).unwrap());
    }
}
