//! Seed manifest (`images.json`) produced when the offline images were exported.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

pub const MANIFEST_FILE: &str = "images.json";

/// One exported image, exactly as written by the export step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub local_tag: String,
    pub remote_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_latest_ref: Option<String>,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Archive file name relative to the seed directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
}

/// Everything the synchronizer needs about one managed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub local_reference: String,
    /// Pinned reference the seed was exported from.
    pub remote_reference: String,
    /// The "latest" reference; its repository is the base for tag overrides.
    pub remote_fallback_reference: Option<String>,
    pub expected_local_id: String,
    pub archive_path: Option<PathBuf>,
    pub archive_sha256: Option<String>,
    pub size: Option<u64>,
}

impl ImageManifest {
    /// Read the manifest. A missing file is an empty manifest, not an error.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no image manifest; nothing to synchronize");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SyncError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| SyncError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `images.json` from a seed directory.
    pub fn load_from_seed_dir(seed_dir: &Path) -> Result<Self, SyncError> {
        Self::load(&seed_dir.join(MANIFEST_FILE))
    }

    /// Resolve descriptors into specs, in manifest order.
    pub fn specs(&self, seed_dir: &Path) -> Vec<ImageSpec> {
        self.images
            .iter()
            .map(|d| ImageSpec {
                local_reference: d.local_tag.clone(),
                remote_reference: d.remote_ref.clone(),
                remote_fallback_reference: d.remote_latest_ref.clone(),
                expected_local_id: d.image_id.clone(),
                archive_path: d.archive.as_ref().map(|name| seed_dir.join(name)),
                archive_sha256: d.sha256.clone(),
                size: d.size,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "images": [
        {
          "local_tag": "un1ca-api:local",
          "remote_ref": "ghcr.io/un1ca/api:2024.06",
          "remote_latest_ref": "ghcr.io/un1ca/api:latest",
          "image_id": "sha256:aaa",
          "created": "2024-06-01T10:00:00Z",
          "archive": "api.tar",
          "size": 123456,
          "sha256": "deadbeef"
        },
        {
          "local_tag": "un1ca-web:local",
          "remote_ref": "ghcr.io/un1ca/web:2024.06",
          "image_id": "sha256:bbb"
        }
      ]
    }"#;

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ImageManifest::load_from_seed_dir(dir.path()).unwrap();
        assert!(manifest.images.is_empty());
        assert!(manifest.specs(dir.path()).is_empty());
    }

    #[test]
    fn test_specs_preserve_order_and_resolve_archives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), SAMPLE).unwrap();

        let specs = ImageManifest::load_from_seed_dir(dir.path())
            .unwrap()
            .specs(dir.path());

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].local_reference, "un1ca-api:local");
        assert_eq!(specs[0].archive_path, Some(dir.path().join("api.tar")));
        assert_eq!(specs[0].archive_sha256.as_deref(), Some("deadbeef"));
        assert_eq!(
            specs[0].remote_fallback_reference.as_deref(),
            Some("ghcr.io/un1ca/api:latest")
        );
        assert_eq!(specs[1].local_reference, "un1ca-web:local");
        assert!(specs[1].archive_path.is_none());
        assert!(specs[1].remote_fallback_reference.is_none());
    }

    #[test]
    fn test_malformed_manifest_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let err = ImageManifest::load_from_seed_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::ManifestParse { .. }));
    }
}
