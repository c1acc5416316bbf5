use std::path::{Path, PathBuf};

use bms_core::OfferId;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// `<sha256>.<ext>`; what offers keep in `tdr_file_id`.
    pub file_id: String,
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, hash-addressed store for TDR documents:
/// `<root>/tdr/<offer_id>/<sha256>.<ext>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path(offer_id: OfferId, file_id: &str) -> PathBuf {
        PathBuf::from("tdr").join(offer_id.to_string()).join(file_id)
    }

    /// Write bytes through a temp file and an atomic rename. Identical
    /// content for the same offer lands on the same path and is not rewritten.
    pub async fn store_tdr(
        &self,
        offer_id: OfferId,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredArtifact, StoreError> {
        let content_hash = Self::sha256_hex(bytes);
        let file_id = format!("{content_hash}.{}", sanitize_extension(extension));
        let relative_path = Self::relative_path(offer_id, &file_id);
        let absolute_path = self.root.join(&relative_path);
        let parent = self.root.join("tdr").join(offer_id.to_string());
        fs::create_dir_all(&parent).await?;

        let stored = |deduplicated| StoredArtifact {
            file_id: file_id.clone(),
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path).await? {
            debug!(offer_id, %file_id, "tdr already stored");
            return Ok(stored(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(stored(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(stored(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err.into())
            }
        }
    }

    pub async fn read_tdr(&self, offer_id: OfferId, file_id: &str) -> Result<Vec<u8>, StoreError> {
        if !is_valid_file_id(file_id) {
            return Err(StoreError::not_found("tdr file", file_id));
        }
        let path = self.root.join(Self::relative_path(offer_id, file_id));
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("tdr file", file_id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn sanitize_extension(extension: &str) -> String {
    let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        "bin".to_string()
    } else {
        ext
    }
}

/// Only ids this store handed out are readable; anything else could escape
/// the offer directory.
fn is_valid_file_id(file_id: &str) -> bool {
    let Some((hash, ext)) = file_id.split_once('.') else {
        return false;
    };
    hash.len() == 64
        && hash.chars().all(|c| c.is_ascii_hexdigit())
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
}
