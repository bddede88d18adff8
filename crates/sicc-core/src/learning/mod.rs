//! Pattern Learning
//!
//! Extracts behavioral patterns from finished conversations:
//! - Greedy clustering on the customer's opening message
//! - Saturating frequency-based confidence
//! - Keyword-table categorisation
//! - Deterministic ids so reruns upsert instead of duplicating

mod extractor;
mod types;

pub use extractor::{PatternExtractor, categorize, pattern_id};
pub use types::*;
