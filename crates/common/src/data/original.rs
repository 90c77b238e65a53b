//! Whole-file corpus: raw text or JSONL, one document per line.
//!
//! The "original format" mode: the configured data path is a single existing
//! file, so the entire file is the dataset. Every non-empty line becomes one
//! document, tokenised, terminated with the end-of-document token, and
//! truncated/padded to the raw row width.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::tokenizer::TokenizerAdapter;

/// In-memory corpus over one raw-text/JSONL file.
#[derive(Debug)]
pub struct OriginalCorpus {
    rows: Vec<Vec<i64>>,
    row_width: usize,
}

impl OriginalCorpus {
    /// Load and tokenise the whole file. Rows are fixed at `row_width` tokens:
    /// long documents are truncated, short ones end with the end-of-document
    /// token and are padded out with the pad token.
    pub fn from_file(
        path: &Path,
        tokenizer: &TokenizerAdapter,
        row_width: usize,
    ) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open corpus file {}", path.display()))?;
        let pad = tokenizer.pad_token_id();
        let eod = tokenizer.eod_token_id();
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut ids = tokenizer.encode(&extract_text(line))?;
            ids.push(eod);
            ids.resize(row_width, pad);
            rows.push(ids);
        }
        if rows.is_empty() {
            bail!("no usable documents in {}", path.display());
        }
        Ok(Self { rows, row_width })
    }

    pub fn doc_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Padded token row for one document.
    pub fn padded_row(&self, doc: u64) -> Result<Vec<i64>> {
        self.rows.get(doc as usize).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "document index {doc} out of range ({} documents)",
                self.rows.len()
            )
        })
    }
}

/// Extract document text from a line: plain text, JSONL with `"text"`, or
/// JSONL with `"input"` + `"output"`. Unrecognised JSON falls back to the raw
/// line.
fn extract_text(line: &str) -> String {
    if line.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(t) = v.get("text").and_then(|t| t.as_str()) {
                return t.to_string();
            }
            if let (Some(inp), Some(out)) = (
                v.get("input").and_then(|x| x.as_str()),
                v.get("output").and_then(|x| x.as_str()),
            ) {
                return format!("{inp}\n{out}");
            }
        }
    }
    line.to_string()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_tokenizer() -> TokenizerAdapter {
        TokenizerAdapter::word_level(&["the", "cat", "sat", "on", "mat"], "<pad>", "<eod>")
            .unwrap()
    }

    fn write_lines(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let mut f = File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    #[test]
    fn rows_are_fixed_width_with_eod_then_pad() {
        let tok = test_tokenizer();
        let (_dir, path) = write_lines(&["the cat", "", "{\"text\": \"sat on mat\"}"]);
        let corpus = OriginalCorpus::from_file(&path, &tok, 6).unwrap();
        assert_eq!(corpus.doc_count(), 2);

        let eod = tok.eod_token_id();
        let pad = tok.pad_token_id();
        // "the cat" -> [the, cat, eod, pad, pad, pad]
        assert_eq!(corpus.padded_row(0).unwrap(), vec![0, 1, eod, pad, pad, pad]);
        // "sat on mat" -> [sat, on, mat, eod, pad, pad]
        assert_eq!(corpus.padded_row(1).unwrap(), vec![2, 3, 4, eod, pad, pad]);
    }

    #[test]
    fn long_documents_are_truncated() {
        let tok = test_tokenizer();
        let (_dir, path) = write_lines(&["the cat sat on mat"]);
        let corpus = OriginalCorpus::from_file(&path, &tok, 3).unwrap();
        // Truncation cuts the document (and its eod) at the row width.
        assert_eq!(corpus.padded_row(0).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn empty_file_is_an_error() {
        let tok = test_tokenizer();
        let (_dir, path) = write_lines(&["", "   "]);
        let err = OriginalCorpus::from_file(&path, &tok, 4).unwrap_err();
        assert!(err.to_string().contains("no usable documents"));
    }

    #[test]
    fn out_of_range_document_is_an_error() {
        let tok = test_tokenizer();
        let (_dir, path) = write_lines(&["the cat"]);
        let corpus = OriginalCorpus::from_file(&path, &tok, 4).unwrap();
        assert!(corpus.padded_row(1).is_err());
    }

    #[test]
    fn extract_text_handles_jsonl_variants() {
        assert_eq!(extract_text("plain words"), "plain words");
        assert_eq!(extract_text("{\"text\": \"hi\"}"), "hi");
        assert_eq!(
            extract_text("{\"input\": \"a\", \"output\": \"b\"}"),
            "a\nb"
        );
        // JSON without a known field falls back to the raw line.
        assert_eq!(extract_text("{\"other\": 1}"), "{\"other\": 1}");
    }
}
