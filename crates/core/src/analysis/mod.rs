//! Mnemonic histograms and histogram-based similarity.
//!
//! - `histogram`: sort a token sequence and collapse runs into counts.
//! - `similarity`: distance between two binaries' function histograms.

pub mod similarity;

use crate::model::MnemonicHistogram;

/// Sort `tokens` and group consecutive equal entries into `(token, count)` pairs.
///
/// The result is ordered by token, so it does not depend on the input order.
pub fn histogram<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Vec<(String, u64)> {
    let mut tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
    tokens.sort();

    let mut grouped: Vec<(String, u64)> = Vec::new();
    for token in tokens {
        match grouped.last_mut() {
            Some((last, count)) if *last == token => *count += 1,
            _ => grouped.push((token, 1)),
        }
    }
    grouped
}

/// Same as [`histogram`], collected into a map.
pub fn histogram_map<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> MnemonicHistogram {
    histogram(tokens).into_iter().collect()
}
