// Filesystem durable backend
//
// One file per item in a flat directory. Item ids are hashed with SHA256
// before being used as filenames.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

use super::StorageBackend;
use crate::{models::ItemId, Result};

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File system storage backend
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create file storage rooted at `base_path`, creating the directory if needed
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn get_path(&self, item_id: &ItemId) -> PathBuf {
        self.base_path.join(hash_key(item_id.as_str()))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn write(&self, item_id: &ItemId, data: Bytes) -> Result<()> {
        let file_path = self.get_path(item_id);
        let size = data.len();

        // Write to a sibling then rename so readers never see partial content
        let tmp_path = file_path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &file_path).await?;

        tracing::trace!(item_id = %item_id, bytes = size, "Wrote item to {:?}", file_path);
        Ok(())
    }

    async fn read(&self, item_id: &ItemId) -> Result<Option<Bytes>> {
        match fs::read(self.get_path(item_id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, item_id: &ItemId) -> Result<bool> {
        Ok(fs::try_exists(self.get_path(item_id)).await?)
    }

    async fn delete(&self, item_id: &ItemId) -> Result<()> {
        match fs::remove_file(self.get_path(item_id)).await {
            Ok(()) => {
                tracing::trace!(item_id = %item_id, "Deleted item file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
