//! Stable identifiers
//!
//! Ids derived from content so that re-running extraction over the same
//! conversations upserts rows instead of duplicating them.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `parts` joined by `|`
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// `<prefix>_<first 16 hex chars of content_hash(parts)>`
pub fn stable_id(prefix: &str, parts: &[&str]) -> String {
    let hash = content_hash(parts);
    format!("{}_{}", prefix, &hash[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_joins_parts() {
        // sha256("hello")
        assert_eq!(
            content_hash(&["hello"]),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_hash(&["a", "b"]), content_hash(&["a|b"]));
        assert_ne!(content_hash(&["ab"]), content_hash(&["a", "b"]));
    }

    #[test]
    fn test_stable_id() {
        let id = stable_id("pat", &["i am interested in product x", "discovery"]);
        assert!(id.starts_with("pat_"));
        assert_eq!(id.len(), 4 + 16);
        assert_eq!(id, stable_id("pat", &["i am interested in product x", "discovery"]));
        assert_ne!(id, stable_id("pat", &["i am interested in product x", "sales"]));
    }
}
