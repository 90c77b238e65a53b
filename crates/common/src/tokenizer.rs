//! Tokeniser adapter.
//!
//! Wraps a Hugging Face `tokenizers::Tokenizer` and resolves the two special
//! tokens this pipeline cares about — padding and end-of-document — to ids
//! once, at construction. Token ids are surfaced as `i64` to match the token
//! tensors downstream.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::models::wordlevel::WordLevel;
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::{ModelWrapper, Tokenizer};

/// Tokeniser plus resolved special-token ids.
#[derive(Debug)]
pub struct TokenizerAdapter {
    inner: Tokenizer,
    pad_id: i64,
    eod_id: i64,
}

impl TokenizerAdapter {
    /// Load a `tokenizer.json` and resolve the named special tokens.
    pub fn from_file(path: &Path, pad_token: &str, eod_token: &str) -> Result<Self> {
        let inner = Tokenizer::from_file(path.as_os_str().to_string_lossy().to_string())
            .map_err(|e| anyhow!("load tokenizer {}: {e}", path.display()))?;
        Self::from_tokenizer(inner, pad_token, eod_token)
    }

    /// Wrap an already-built tokeniser.
    pub fn from_tokenizer(inner: Tokenizer, pad_token: &str, eod_token: &str) -> Result<Self> {
        let pad_id = resolve(&inner, pad_token)?;
        let eod_id = resolve(&inner, eod_token)?;
        Ok(Self {
            inner,
            pad_id,
            eod_id,
        })
    }

    /// In-memory word-level tokeniser over a fixed vocabulary, split on
    /// whitespace. The pad and end-of-document tokens are appended to the
    /// vocabulary if absent; unknown words fall back to the pad token.
    pub fn word_level(words: &[&str], pad_token: &str, eod_token: &str) -> Result<Self> {
        let mut vocab: HashMap<String, u32> = HashMap::new();
        for word in words {
            let id = vocab.len() as u32;
            vocab.entry((*word).to_string()).or_insert(id);
        }
        for special in [pad_token, eod_token] {
            let id = vocab.len() as u32;
            vocab.entry(special.to_string()).or_insert(id);
        }
        // The builder's vocab type is a private hash-map alias; collect into
        // whatever it expects.
        let model = WordLevel::builder()
            .vocab(vocab.into_iter().collect())
            .unk_token(pad_token.to_string())
            .build()
            .map_err(|e| anyhow!("build word-level tokenizer: {e}"))?;
        let mut inner = Tokenizer::new(ModelWrapper::WordLevel(model));
        inner.with_pre_tokenizer(Some(Whitespace));
        Self::from_tokenizer(inner, pad_token, eod_token)
    }

    /// Tokenise one document.
    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let enc = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        Ok(enc.get_ids().iter().map(|&id| id as i64).collect())
    }

    pub fn pad_token_id(&self) -> i64 {
        self.pad_id
    }

    pub fn eod_token_id(&self) -> i64 {
        self.eod_id
    }

    /// Vocabulary size including added tokens (feeds the model factory).
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

fn resolve(inner: &Tokenizer, token: &str) -> Result<i64> {
    inner
        .token_to_id(token)
        .map(|id| id as i64)
        .ok_or_else(|| anyhow!("token {token:?} is not in the tokenizer vocabulary"))
}

// ── Tests ───────────────────────────────────────────────────────────────────
