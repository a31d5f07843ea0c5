// Object storage durable backend
//
// Supports AWS S3, Aliyun OSS, Minio and any S3-compatible storage through
// OpenDAL. The backend itself is only compiled with the `oss` feature; the
// configuration type is always available so config files parse either way.

use serde::{Deserialize, Serialize};

/// OSS storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OssConfig {
    /// Endpoint (e.g., "s3.amazonaws.com" or "oss-cn-hangzhou.aliyuncs.com")
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: Option<String>,
    /// Key prefix inside the bucket (e.g., "logs/")
    pub base_path: String,
}

#[cfg(feature = "oss")]
mod inner {
    use async_trait::async_trait;
    use bytes::Bytes;
    use opendal::{services::S3, ErrorKind, Operator};
    use sha2::{Digest, Sha256};

    use super::OssConfig;
    use crate::{models::ItemId, storage::StorageBackend, Error, Result};

    fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn storage_error(op: &str, e: &opendal::Error) -> Error {
        Error::Storage(format!("OSS {op} failed: {e}"))
    }

    /// OSS storage backend
    pub struct OssStorage {
        base_path: String,
        operator: Operator,
    }

    impl OssStorage {
        pub fn new(config: &OssConfig) -> Result<Self> {
            tracing::info!(
                bucket = %config.bucket,
                endpoint = %config.endpoint,
                "Initializing OSS storage"
            );

            let mut builder = S3::default()
                .endpoint(&config.endpoint)
                .access_key_id(&config.access_key_id)
                .secret_access_key(&config.secret_access_key)
                .bucket(&config.bucket);

            if let Some(region) = &config.region {
                builder = builder.region(region);
            }

            let operator = Operator::new(builder)
                .map_err(|e| Error::Configuration(format!("Invalid OSS configuration: {e}")))?
                .finish();

            Ok(Self {
                base_path: config.base_path.clone(),
                operator,
            })
        }

        fn get_object_key(&self, item_id: &ItemId) -> String {
            format!("{}{}", self.base_path, hash_key(item_id.as_str()))
        }
    }

    #[async_trait]
    impl StorageBackend for OssStorage {
        async fn write(&self, item_id: &ItemId, data: Bytes) -> Result<()> {
            let object_key = self.get_object_key(item_id);
            let size = data.len();

            self.operator
                .write(&object_key, data)
                .await
                .map_err(|e| storage_error("write", &e))?;

            tracing::trace!(item_id = %item_id, bytes = size, "Wrote item to OSS: {}", object_key);
            Ok(())
        }

        async fn read(&self, item_id: &ItemId) -> Result<Option<Bytes>> {
            let object_key = self.get_object_key(item_id);
            match self.operator.read(&object_key).await {
                Ok(buffer) => Ok(Some(Bytes::from(buffer.to_vec()))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(storage_error("read", &e)),
            }
        }

        async fn exists(&self, item_id: &ItemId) -> Result<bool> {
            self.operator
                .exists(&self.get_object_key(item_id))
                .await
                .map_err(|e| storage_error("exists", &e))
        }

        async fn delete(&self, item_id: &ItemId) -> Result<()> {
            // OpenDAL treats deleting a missing object as success
            self.operator
                .delete(&self.get_object_key(item_id))
                .await
                .map_err(|e| storage_error("delete", &e))
        }

        fn kind(&self) -> &'static str {
            "oss"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_object_key_is_prefixed_hash() {
            let storage = OssStorage::new(&OssConfig {
                endpoint: "http://localhost:9000".to_string(),
                access_key_id: "test".to_string(),
                secret_access_key: "test".to_string(),
                bucket: "logs".to_string(),
                region: Some("us-east-1".to_string()),
                base_path: "cdn/".to_string(),
            })
            .unwrap();

            let key = storage.get_object_key(&ItemId::from("abc"));
            assert!(key.starts_with("cdn/"));
            assert_eq!(key.len(), "cdn/".len() + 64);
        }
    }
}

#[cfg(feature = "oss")]
pub use inner::OssStorage;
