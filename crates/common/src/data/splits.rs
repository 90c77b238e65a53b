//! Split planning: document ranges and deterministic sample order.
//!
//! Pure functions over document counts; nothing here touches the filesystem.
//! Identical inputs always produce identical output, which is what makes
//! split membership reproducible across runs.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Partition `doc_count` documents into contiguous train/valid/test ranges
/// from normalised fractions.
///
/// Boundaries are placed by cumulative rounding, then shifted uniformly so
/// the final boundary lands exactly on `doc_count`. The three ranges always
/// partition `0..doc_count`.
pub fn split_doc_ranges(doc_count: usize, fractions: [f64; 3]) -> [Range<usize>; 3] {
    let mut bounds = [0i64; 4];
    for (i, f) in fractions.iter().enumerate() {
        bounds[i + 1] = bounds[i] + (f * doc_count as f64).round() as i64;
    }
    let drift = bounds[3] - doc_count as i64;
    for b in bounds.iter_mut().skip(1) {
        *b -= drift;
    }
    let clamp = |v: i64| v.clamp(0, doc_count as i64) as usize;
    [
        clamp(bounds[0])..clamp(bounds[1]),
        clamp(bounds[1])..clamp(bounds[2]),
        clamp(bounds[2])..clamp(bounds[3]),
    ]
}

/// Deterministic document order for one split.
///
/// The range is shuffled once per epoch with `seed + epoch` and cycled until
/// `samples` ids are produced. An empty range or a zero request yields an
/// empty order.
pub fn sample_order(range: Range<usize>, samples: usize, seed: u64) -> Vec<u64> {
    let len = range.len();
    if len == 0 || samples == 0 {
        return Vec::new();
    }
    let epochs = samples.div_ceil(len);
    let mut order = Vec::with_capacity(epochs * len);
    for epoch in 0..epochs as u64 {
        let mut ids: Vec<u64> = (range.start as u64..range.end as u64).collect();
        ids.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(epoch)));
        order.extend_from_slice(&ids);
    }
    order.truncate(samples);
    order
}

// ── Tests ───────────────────────────────────────────────────────────────────
