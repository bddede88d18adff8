//! SICC Utilities
//!
//! Common helpers shared by the SICC components.

mod hashing;
mod similarity;
mod validation;

pub use hashing::{content_hash, stable_id};
pub use similarity::{TextSimilarity, TokenOverlap, jaccard, normalize_text, tokenize};
pub use validation::{validate_finite, validate_limit, validate_non_empty, validate_unit_interval};
