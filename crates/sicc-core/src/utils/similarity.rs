//! Text Similarity
//!
//! Token-overlap similarity used by pattern clustering, conflict detection
//! and request-time relevance scoring. Callers depend on [`TextSimilarity`]
//! so a stronger measure can be swapped in without touching them.

use std::collections::BTreeSet;

/// A symmetric similarity measure over two texts, in `[0, 1]`.
pub trait TextSimilarity: Send + Sync {
    /// Measure name, used in logs
    fn name(&self) -> &str;

    /// Similarity of `a` and `b`
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Jaccard index over lowercase word tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlap;

impl TextSimilarity for TokenOverlap {
    fn name(&self) -> &str {
        "token_overlap"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&tokenize(a), &tokenize(b))
    }
}

/// Split text into a set of lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Lowercase, strip punctuation and collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Intersection over union of two sets; two empty sets score 0.0
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.union(b).count();

    intersection as f64 / union as f64
}
