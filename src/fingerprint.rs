//! Text normalization and content fingerprinting.
//!
//! Identical normalized text always produces an identical hash. Items with
//! no usable body text fall back to a hash over their metadata arrays,
//! tagged [`HashKind::MetadataOnly`] so it can never be mistaken for (or
//! compared equal to) a true content hash.

use sha2::{Digest, Sha256};

use crate::models::{HashKind, ItemMetadata};

/// A computed content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub kind: HashKind,
}

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint an item from its body text, falling back to metadata when
/// the normalized body is empty.
pub fn fingerprint(body: &str, metadata: &ItemMetadata) -> Fingerprint {
    let normalized = normalize_text(body);

    if normalized.is_empty() {
        return Fingerprint {
            hash: metadata_hash(metadata),
            kind: HashKind::MetadataOnly,
        };
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Fingerprint {
        hash: format!("{:x}", hasher.finalize()),
        kind: HashKind::Content,
    }
}

/// Hash the metadata arrays in field order. Field and value separators are
/// control bytes that cannot appear in normalized tags, so distinct
/// metadata cannot collide by concatenation.
fn metadata_hash(metadata: &ItemMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"metadata-only");
    for (name, values) in metadata.fields() {
        hasher.update([0x1e]);
        hasher.update(name.as_bytes());
        for value in values {
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_collapses() {
        assert_eq!(
            normalize_text("  Three   Sisters\n\nGarden\t"),
            "three sisters garden"
        );
    }

    #[test]
    fn identical_normalized_text_same_hash() {
        let meta = ItemMetadata::default();
        let a = fingerprint("Compost 101\n\nLayer greens and browns.", &meta);
        let b = fingerprint("  compost 101 layer   greens and browns.  ", &meta);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.kind, HashKind::Content);
    }

    #[test]
    fn different_text_different_hash() {
        let meta = ItemMetadata::default();
        let a = fingerprint("Compost 101", &meta);
        let b = fingerprint("Compost 102", &meta);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn empty_body_falls_back_to_metadata() {
        let meta = ItemMetadata {
            themes: vec!["soil".to_string()],
            ..Default::default()
        };
        let fp = fingerprint("   \n\t ", &meta);
        assert_eq!(fp.kind, HashKind::MetadataOnly);

        let other = ItemMetadata {
            themes: vec!["water".to_string()],
            ..Default::default()
        };
        let fp2 = fingerprint("", &other);
        assert_ne!(fp.hash, fp2.hash);
    }

    #[test]
    fn metadata_hash_never_collides_with_content_hash_of_same_bytes() {
        // An item whose body happens to spell out the metadata encoding
        // still gets a distinct content-kind hash.
        let meta = ItemMetadata {
            themes: vec!["soil".to_string()],
            ..Default::default()
        };
        let meta_fp = fingerprint("", &meta);
        let content_fp = fingerprint("metadata-only themes soil", &ItemMetadata::default());
        assert_ne!(meta_fp.hash, content_fp.hash);
        assert_ne!(meta_fp.kind, content_fp.kind);
    }

    #[test]
    fn field_position_matters() {
        let a = ItemMetadata {
            themes: vec!["soil".to_string()],
            ..Default::default()
        };
        let b = ItemMetadata {
            skills: vec!["soil".to_string()],
            ..Default::default()
        };
        assert_ne!(fingerprint("", &a).hash, fingerprint("", &b).hash);
    }
}
