//! # mixtrain-common — Configuration, Tokeniser & Corpora
//!
//! Shared foundation for the pretraining pipeline:
//!
//! * **[`PretrainOptions`]** — one validated options object, passed by
//!   reference into every component; decides the [`CorpusKind`] exactly once.
//! * **[`TokenizerAdapter`]** — tokeniser with resolved pad/end-of-document ids.
//! * **[`Corpus`]** / **[`SplitDataset`]** — whole-file or indexed-shard
//!   corpora behind one row surface, with deterministic split planning.
//! * **[`RawBatch`]** / **[`BatchIter`]** — fixed-width i64 token batches.

pub mod config;
pub mod data;
pub mod tokenizer;

pub use config::{parse_split_ratios, CorpusKind, PositionEmbedding, PretrainOptions};
pub use data::{
    build_from_indexed, build_from_original, build_train_valid_test, write_indexed_shard,
    BatchIter, Corpus, IndexedCorpus, IndexedShard, OriginalCorpus, RawBatch, SplitDataset,
    TrainValTest,
};
pub use tokenizer::TokenizerAdapter;
