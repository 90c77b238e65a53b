//! Indexed binary-shard corpus: `{prefix}.bin` tokens + `{prefix}.idx` offsets.
//!
//! The pre-tokenised fast path for large corpora. The `.bin` file holds every
//! document's token ids back to back; the `.idx` file maps document index →
//! (token offset, token length) so sampling is random-access without
//! re-parsing text. Data is memory-mapped; only pages actually read are
//! faulted in, unless warm-up is requested at open.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

/// Magic bytes for the shard index format (version 1).
const INDEX_MAGIC: &[u8; 4] = b"MIX1";
/// Index header: magic (4) + document count (8).
const INDEX_HEADER_LEN: usize = 4 + 8;
/// Bytes per document entry: token offset u64 + token length u32.
const INDEX_ENTRY_LEN: usize = 8 + 4;

/// Write a document-indexed shard pair for use with [`IndexedShard`].
///
/// `{prefix}.bin`: concatenated token ids as u32 LE. `{prefix}.idx`: magic
/// "MIX1" (4 bytes), document count as u64 LE (8 bytes), then one entry per
/// document — token offset as u64 LE (8 bytes) + token length as u32 LE
/// (4 bytes).
pub fn write_indexed_shard(prefix: &Path, docs: &[Vec<u32>]) -> Result<()> {
    let bin_path = suffixed(prefix, ".bin");
    let mut bin = File::create(&bin_path)
        .with_context(|| format!("create shard data {}", bin_path.display()))?;
    let mut index = Vec::with_capacity(INDEX_HEADER_LEN + docs.len() * INDEX_ENTRY_LEN);
    index.extend_from_slice(INDEX_MAGIC);
    index.extend_from_slice(&(docs.len() as u64).to_le_bytes());
    let mut offset = 0u64;
    for doc in docs {
        for &id in doc {
            bin.write_all(&id.to_le_bytes())?;
        }
        index.extend_from_slice(&offset.to_le_bytes());
        index.extend_from_slice(&(doc.len() as u32).to_le_bytes());
        offset += doc.len() as u64;
    }
    bin.sync_all().context("sync shard data")?;
    let idx_path = suffixed(prefix, ".idx");
    std::fs::write(&idx_path, &index)
        .with_context(|| format!("write shard index {}", idx_path.display()))?;
    Ok(())
}

// ── IndexedShard ────────────────────────────────────────────────────────────

/// One memory-mapped shard: random access to documents by index.
#[derive(Debug)]
pub struct IndexedShard {
    bin: Mmap,
    entries: Vec<(u64, u32)>,
    prefix: PathBuf,
}

impl IndexedShard {
    /// Open `{prefix}.bin` + `{prefix}.idx`, validating magic and lengths.
    /// With `warm` set, every mapped page is touched once so first-epoch
    /// reads do not fault.
    pub fn open(prefix: &Path, warm: bool) -> Result<Self> {
        let idx_path = suffixed(prefix, ".idx");
        let idx = std::fs::read(&idx_path).with_context(|| {
            format!("missing or unreadable shard index {}", idx_path.display())
        })?;
        if idx.len() < INDEX_HEADER_LEN {
            bail!("shard index too short: {}", idx_path.display());
        }
        if &idx[0..4] != INDEX_MAGIC {
            bail!("invalid shard index {}: bad magic", idx_path.display());
        }
        let doc_count = u64::from_le_bytes(idx[4..12].try_into().unwrap()) as usize;
        let expected = INDEX_HEADER_LEN + doc_count * INDEX_ENTRY_LEN;
        if idx.len() < expected {
            bail!(
                "shard index truncated: expected {} bytes, got {} in {}",
                expected,
                idx.len(),
                idx_path.display()
            );
        }
        let mut entries = Vec::with_capacity(doc_count);
        for d in 0..doc_count {
            let at = INDEX_HEADER_LEN + d * INDEX_ENTRY_LEN;
            let offset = u64::from_le_bytes(idx[at..at + 8].try_into().unwrap());
            let len = u32::from_le_bytes(idx[at + 8..at + 12].try_into().unwrap());
            entries.push((offset, len));
        }

        let bin_path = suffixed(prefix, ".bin");
        let file = File::open(&bin_path).with_context(|| {
            format!("missing or unreadable shard data {}", bin_path.display())
        })?;
        let bin = unsafe {
            Mmap::map(&file)
                .with_context(|| format!("mmap shard data {}", bin_path.display()))?
        };
        if bin.len() % 4 != 0 {
            bail!(
                "shard data {} is not a whole number of u32 tokens ({} bytes)",
                bin_path.display(),
                bin.len()
            );
        }
        let token_capacity = (bin.len() / 4) as u64;
        let max_end = entries.iter().map(|&(o, l)| o + l as u64).max().unwrap_or(0);
        if max_end > token_capacity {
            bail!(
                "shard data truncated: index addresses token {}, {} holds {}",
                max_end,
                bin_path.display(),
                token_capacity
            );
        }
        if warm {
            warm_pages(&bin);
        }
        Ok(Self {
            bin,
            entries,
            prefix: prefix.to_path_buf(),
        })
    }

    pub fn doc_count(&self) -> usize {
        self.entries.len()
    }

    /// Token ids of one document.
    pub fn doc(&self, i: usize) -> Result<Vec<u32>> {
        let &(offset, len) = self.entries.get(i).ok_or_else(|| {
            anyhow::anyhow!(
                "document index {i} out of range in shard {}",
                self.prefix.display()
            )
        })?;
        let start = offset as usize * 4;
        let end = start + len as usize * 4;
        Ok(self.bin[start..end]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
            .collect())
    }
}

// ── IndexedCorpus ───────────────────────────────────────────────────────────

/// Documents across one or more shards behind a single index space, padded to
/// the raw row width on read.
#[derive(Debug)]
pub struct IndexedCorpus {
    shards: Vec<IndexedShard>,
    cumulative: Vec<u64>,
    row_width: usize,
    pad_id: i64,
}

impl IndexedCorpus {
    /// Open every shard prefix. Fails fast on the first missing or corrupt
    /// shard, naming the offending path.
    pub fn open(
        prefixes: &[PathBuf],
        row_width: usize,
        pad_id: i64,
        warm: bool,
    ) -> Result<Self> {
        if prefixes.is_empty() {
            bail!("no shard prefixes supplied");
        }
        let mut shards = Vec::with_capacity(prefixes.len());
        let mut cumulative = Vec::with_capacity(prefixes.len());
        let mut total = 0u64;
        for prefix in prefixes {
            let shard = IndexedShard::open(prefix, warm)?;
            total += shard.doc_count() as u64;
            cumulative.push(total);
            shards.push(shard);
        }
        if total == 0 {
            bail!("indexed corpus is empty across {} shard(s)", shards.len());
        }
        Ok(Self {
            shards,
            cumulative,
            row_width,
            pad_id,
        })
    }

    pub fn doc_count(&self) -> usize {
        *self.cumulative.last().unwrap_or(&0) as usize
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Padded token row for one document in the corpus-wide index space.
    pub fn padded_row(&self, doc: u64) -> Result<Vec<i64>> {
        let shard_i = self.cumulative.partition_point(|&end| end <= doc);
        let shard = self.shards.get(shard_i).ok_or_else(|| {
            anyhow::anyhow!(
                "document index {doc} out of range ({} documents)",
                self.doc_count()
            )
        })?;
        let before = if shard_i == 0 {
            0
        } else {
            self.cumulative[shard_i - 1]
        };
        let tokens = shard.doc((doc - before) as usize)?;
        let mut row: Vec<i64> = tokens
            .iter()
            .take(self.row_width)
            .map(|&t| t as i64)
            .collect();
        row.resize(self.row_width, self.pad_id);
        Ok(row)
    }
}

/// Touch one byte per page so the kernel faults the whole mapping in now.
fn warm_pages(bin: &Mmap) {
    const PAGE: usize = 4096;
    let mut checksum = 0u8;
    for i in (0..bin.len()).step_by(PAGE) {
        checksum ^= bin[i];
    }
    std::hint::black_box(checksum);
    tracing::debug!(bytes = bin.len(), "warmed shard pages");
}

fn suffixed(prefix: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_os_string();
    s.push(ext);
    PathBuf::from(s)
}

// ── Tests ───────────────────────────────────────────────────────────────────
