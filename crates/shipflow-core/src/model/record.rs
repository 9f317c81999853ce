//! 公開記録（publish record）

use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// レジストリへの公開1回分の記録
///
/// (registry, repository, tag, image_digest) の組が冪等性キーになります。
/// 同一キーの記録が既にあれば、同じ内容のpushは省略できます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub image_digest: Digest,
    pub pushed_at: DateTime<Utc>,
}

impl PublishRecord {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        image_digest: Digest,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
            image_digest,
            pushed_at: Utc::now(),
        }
    }

    /// 冪等性キーが一致するか
    pub fn matches(&self, registry: &str, repository: &str, tag: &str, digest: &Digest) -> bool {
        self.registry == registry
            && self.repository == repository
            && self.tag == tag
            && &self.image_digest == digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_full_key() {
        let digest = Digest::of_bytes("image");
        let record = PublishRecord::new("ghcr.io", "acme/app", "v1", digest.clone());

        assert!(record.matches("ghcr.io", "acme/app", "v1", &digest));
        assert!(!record.matches("ghcr.io", "acme/app", "v2", &digest));
        assert!(!record.matches("ghcr.io", "acme/other", "v1", &digest));
        assert!(!record.matches("docker.io", "acme/app", "v1", &digest));
        assert!(!record.matches("ghcr.io", "acme/app", "v1", &Digest::of_bytes("other")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let record = PublishRecord::new("ghcr.io", "acme/app", "v1", Digest::of_bytes("image"));
        let json = serde_json::to_string(&record).unwrap();
        let back: PublishRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
