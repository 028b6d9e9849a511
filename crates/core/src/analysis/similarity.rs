//! Histogram distance between two binaries.
//!
//! Each function becomes a vector of mnemonic counts over the union of
//! mnemonics seen in both binaries. Every function of one side is paired with
//! its closest function on the other side; the distance is the larger of the
//! two mean closest-pair distances.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{BinaryHistogram, ExportRecord, Tag};

/// Matches at or above this distance are not reported.
pub const DEFAULT_MAX_DISTANCE: f64 = 5.0;

/// Tags whose function count differs from the sample by more than this ratio are skipped.
pub const DEFAULT_FUNCTION_COUNT_TOLERANCE: f64 = 0.3;

/// Knobs for [`match_tags`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub max_distance: f64,
    pub function_count_tolerance: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            function_count_tolerance: DEFAULT_FUNCTION_COUNT_TOLERANCE,
        }
    }
}

/// A tag close enough to the sample to be reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMatch {
    pub tag: String,
    pub distance: f64,
    pub description: String,
    pub imports_match: bool,
}

/// Why a tag was not scored against the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    ArchMismatch,
    FunctionCount { ratio: f64 },
}

/// Euclidean distance of two equally sized vectors.
pub fn euclidean_function_distance(f0: &[f64], f1: &[f64]) -> f64 {
    f0.iter().zip(f1).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt()
}

/// Angular score in `[-1, 1]`: `1` for parallel vectors, `-1` for opposite ones.
///
/// A zero dot product scores `1.0`.
pub fn cosine_function_distance(f0: &[f64], f1: &[f64]) -> f64 {
    let dot: f64 = f0.iter().zip(f1).map(|(a, b)| a * b).sum();
    if dot == 0.0 {
        return 1.0;
    }
    let n0 = f0.iter().map(|v| v * v).sum::<f64>().sqrt();
    let n1 = f1.iter().map(|v| v * v).sum::<f64>().sqrt();
    let cos_phi = (dot / (n0 * n1)).clamp(-1.0, 1.0);
    1.0 - 2.0 * cos_phi.acos() / PI
}

fn function_vectors(histogram: &BinaryHistogram, mnemonics: &[&str]) -> Vec<Vec<f64>> {
    histogram
        .values()
        .map(|counts| {
            mnemonics.iter().map(|m| counts.get(*m).copied().unwrap_or(0) as f64).collect()
        })
        .collect()
}

fn min_of(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::INFINITY, f64::min)
}

/// Distance between two binaries' function histograms; `0.0` for identical input.
///
/// Returns `f64::INFINITY` when either side has no functions.
pub fn calculate_distance(s0: &BinaryHistogram, s1: &BinaryHistogram) -> f64 {
    if s0.is_empty() || s1.is_empty() {
        return f64::INFINITY;
    }

    let mnemonics: BTreeSet<&str> =
        s0.values().chain(s1.values()).flat_map(|h| h.keys().map(String::as_str)).collect();
    let mnemonics: Vec<&str> = mnemonics.into_iter().collect();

    let v0 = function_vectors(s0, &mnemonics);
    let v1 = function_vectors(s1, &mnemonics);

    let matrix: Vec<Vec<f64>> = v0
        .iter()
        .map(|f0| {
            v1.iter()
                .map(|f1| cosine_function_distance(f0, f1) * euclidean_function_distance(f0, f1))
                .collect()
        })
        .collect();

    let rows = matrix.len() as f64;
    let cols = v1.len() as f64;
    let dh = matrix.iter().map(|row| min_of(row.iter().copied())).sum::<f64>() / rows;
    let dv = (0..v1.len()).map(|j| min_of(matrix.iter().map(|row| row[j]))).sum::<f64>() / cols;

    dh.max(dv)
}

/// Decide whether `tag` is too different from `sample` to be worth scoring.
pub fn skip_tag(sample: &ExportRecord, tag: &Tag, tolerance: f64) -> Option<SkipReason> {
    if sample.arch != tag.arch {
        return Some(SkipReason::ArchMismatch);
    }

    let s_f = sample.histogram.len() as f64;
    let s_t = tag.histogram.len() as f64;
    if s_f != s_t {
        let ratio = (s_f - s_t).abs() / (s_f + s_t);
        if ratio > tolerance {
            return Some(SkipReason::FunctionCount { ratio });
        }
    }
    None
}

/// Multiset equality of two import lists.
pub fn same_imports(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// Score every eligible tag against `sample`, closest first.
pub fn match_tags(sample: &ExportRecord, tags: &[Tag], options: &MatchOptions) -> Vec<TagMatch> {
    let mut matches: Vec<TagMatch> = Vec::new();
    for tag in tags {
        if let Some(reason) = skip_tag(sample, tag, options.function_count_tolerance) {
            debug!(tag = %tag.tag, ?reason, "skipping tag");
            continue;
        }
        let distance = calculate_distance(&tag.histogram, &sample.histogram);
        debug!(tag = %tag.tag, distance, "scored tag");
        if distance < options.max_distance {
            matches.push(TagMatch {
                tag: tag.tag.clone(),
                distance,
                description: tag.description.clone(),
                imports_match: same_imports(&tag.imports, &sample.imports),
            });
        }
    }
    matches.sort_by(|a, b| {
        a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal).then(a.tag.cmp(&b.tag))
    });
    matches
}
