use std::time::Duration;

use mediavault_thumbnail::{ThumbnailSize, default_sizes};
use mediavault_transfer::{DEFAULT_CHUNK_SIZE, DigestAlgorithm};
use serde::{Deserialize, Serialize};

/// Limits and defaults applied by the [`ResourceManager`](crate::ResourceManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Chunk size used when a client does not pick one.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Largest accepted upload of any kind, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Largest accepted image upload, in bytes.
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    /// Digest clients use for chunk checksums.
    #[serde(default)]
    pub digest: DigestAlgorithm,

    /// Per-chunk storage write timeout in seconds (0 disables it).
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Thumbnail sizes derived for image uploads.
    #[serde(default = "default_sizes")]
    pub thumbnails: Vec<ThumbnailSize>,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_image_size() -> u64 {
    10 * 1024 * 1024
}

fn default_chunk_timeout_secs() -> u64 {
    30
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            max_image_size: default_max_image_size(),
            digest: DigestAlgorithm::default(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            thumbnails: default_sizes(),
        }
    }
}

impl ResourceConfig {
    /// Default chunk write timeout, if enabled.
    pub fn chunk_timeout(&self) -> Option<Duration> {
        (self.chunk_timeout_secs > 0).then(|| Duration::from_secs(self.chunk_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ResourceConfig::default();
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.max_file_size, 100 * 1024 * 1024);
        assert_eq!(c.max_image_size, 10 * 1024 * 1024);
        assert_eq!(c.digest, DigestAlgorithm::Md5);
        assert_eq!(c.chunk_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.thumbnails.len(), 3);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let c: ResourceConfig = toml::from_str(
            r#"
            digest = "sha256"
            chunk_timeout_secs = 0

            [[thumbnails]]
            tag = "tiny"
            width = 64
            height = 64
            "#,
        )
        .unwrap();
        assert_eq!(c.digest, DigestAlgorithm::Sha256);
        assert_eq!(c.chunk_timeout(), None);
        assert_eq!(c.thumbnails, vec![ThumbnailSize::new("tiny", 64, 64)]);
        assert_eq!(c.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn roundtrip_toml() {
        let c = ResourceConfig {
            chunk_size: 4096,
            ..ResourceConfig::default()
        };
        let parsed: ResourceConfig = toml::from_str(&toml::to_string_pretty(&c).unwrap()).unwrap();
        assert_eq!(parsed, c);
    }
}
