use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::digest::{self, Digest};

pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

// IndexMap's PartialEq is set-wise (ignores insertion order), which is what we want here
pub type Annotations = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: Annotations,
}

impl Descriptor {
    pub fn for_bytes(media_type: impl Into<String>, bytes: &[u8], annotations: Annotations) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest: digest::compute_digest_bytes(bytes),
            size: bytes.len() as u64,
            annotations,
        }
    }

    // title annotation if present, otherwise the hex digest
    pub fn cache_file_name(&self) -> String {
        self.annotations
            .get(TITLE_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| self.digest.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_bytes_computes_digest_and_size() {
        let d = Descriptor::for_bytes("application/vnd.bicep.layer.v1+json", b"abc", Annotations::new());
        assert_eq!(d.size, 3);
        assert_eq!(d.digest, digest::compute_digest_bytes(b"abc"));
        assert!(d.annotations.is_empty());
    }

    #[test]
    fn cache_file_name_prefers_title_annotation() {
        let mut annotations = Annotations::new();
        annotations.insert(TITLE_ANNOTATION.to_string(), "main.json".to_string());
        let d = Descriptor::for_bytes("application/octet-stream", b"data", annotations);
        assert_eq!(d.cache_file_name(), "main.json");
    }

    #[test]
    fn cache_file_name_falls_back_to_digest() {
        let d = Descriptor::for_bytes("application/octet-stream", b"data", Annotations::new());
        assert_eq!(d.cache_file_name(), d.digest.trim());
    }

    #[test]
    fn annotations_equality_is_order_independent() {
        let mut a = Annotations::new();
        a.insert("x".into(), "1".into());
        a.insert("y".into(), "2".into());
        let mut b = Annotations::new();
        b.insert("y".into(), "2".into());
        b.insert("x".into(), "1".into());
        assert_eq!(a, b);
    }
}
