use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::validation::is_not_found_error;

/// One listed backup archive, in the shape the dashboard consumes.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub key: String,
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
}

/// Raw failure from an object-store client, before classification. Carries
/// whichever identifying fields the client exposed.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StoreRequestError {
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: Option<i64>,
}

/// Minimal object-store client abstraction. `S3ObjectStore` is the only
/// component that issues network calls to the store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError>;
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Vec<ObjectEntry>, StoreRequestError>;
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreRequestError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError>;
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

fn request_error<E>(err: SdkError<E>) -> StoreRequestError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = match err.message() {
        Some(m) => m.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    StoreRequestError {
        code,
        status,
        message,
    }
}

fn timestamp_from(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError> {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(request_error)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Vec<ObjectEntry>, StoreRequestError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(request_error)?;

        let entries = resp
            .contents()
            .iter()
            .map(|obj| ObjectEntry {
                key: obj.key().unwrap_or_default().to_string(),
                last_modified: obj.last_modified().and_then(timestamp_from),
                size: obj.size(),
            })
            .collect();

        Ok(entries)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreRequestError> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| StoreRequestError {
            code: None,
            status: None,
            message: e.to_string(),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(request_error)?;

        Ok(request.uri().to_string())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(request_error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backup not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Store(String),
}

/// Mediates all interaction with the remote object store. Every remote
/// failure is classified exactly once, here, into not-found vs. generic.
#[derive(Clone)]
pub struct BackupStore {
    store: Arc<dyn ObjectStore>,
}

impl BackupStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn classify(key: &str, err: StoreRequestError) -> StoreError {
        let not_found = is_not_found_error(err.code.as_deref(), err.status, &err.message);
        debug!(
            code = ?err.code,
            status = ?err.status,
            message = %err.message,
            not_found,
            "Classified object store error"
        );
        if not_found {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Store(err.message)
        }
    }

    /// Lightweight existence probe, run before data-returning and
    /// list-altering operations so a missing object yields a structured
    /// not-found instead of a downstream client failure.
    pub async fn check_exists(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.store
            .head_object(bucket, key)
            .await
            .map_err(|e| Self::classify(key, e))
    }

    /// Lists archives under `prefix`, newest first. Entries without a key
    /// are dropped; entries without a timestamp keep their relative order.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Vec<BackupRecord>, StoreError> {
        let entries = self
            .store
            .list_objects(bucket, prefix, max_keys)
            .await
            .map_err(|e| Self::classify(prefix, e))?;

        let mut records: Vec<BackupRecord> = entries
            .into_iter()
            .filter(|entry| !entry.key.is_empty())
            .map(|entry| BackupRecord {
                key: entry.key,
                last_modified: entry.last_modified,
                size: entry.size.unwrap_or(0),
            })
            .collect();

        records.sort_by(|a, b| match (&a.last_modified, &b.last_modified) {
            (Some(a), Some(b)) => b.cmp(a),
            _ => Ordering::Equal,
        });

        Ok(records)
    }

    /// Produces a time-limited, pre-authorized retrieval URL. The object's
    /// bytes never stream through this process.
    pub async fn download_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.store
            .presign_get(bucket, key, ttl)
            .await
            .map_err(|e| Self::classify(key, e))
    }

    /// Deletes an archive, probing for existence first.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.check_exists(bucket, key).await?;
        self.store
            .delete_object(bucket, key)
            .await
            .map_err(|e| Self::classify(key, e))
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory object store double for tests.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<BTreeMap<String, ObjectEntry>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(
            &self,
            bucket: &str,
            key: &str,
            last_modified: Option<DateTime<Utc>>,
            size: i64,
        ) {
            let entry = ObjectEntry {
                key: key.to_string(),
                last_modified,
                size: Some(size),
            };
            self.objects
                .lock()
                .unwrap()
                .insert(object_id(bucket, key), entry);
        }

        fn missing(key: &str) -> StoreRequestError {
            StoreRequestError {
                code: Some("NotFound".to_string()),
                status: Some(404),
                message: format!("object {key} does not exist"),
            }
        }
    }

    fn object_id(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn head_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError> {
            if self
                .objects
                .lock()
                .unwrap()
                .contains_key(&object_id(bucket, key))
            {
                Ok(())
            } else {
                Err(Self::missing(key))
            }
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            max_keys: i32,
        ) -> Result<Vec<ObjectEntry>, StoreRequestError> {
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .iter()
                .filter(|(id, _)| id.starts_with(&object_id(bucket, prefix)))
                .take(max_keys as usize)
                .map(|(_, entry)| entry.clone())
                .collect())
        }

        async fn presign_get(
            &self,
            bucket: &str,
            key: &str,
            ttl: Duration,
        ) -> Result<String, StoreRequestError> {
            if !self
                .objects
                .lock()
                .unwrap()
                .contains_key(&object_id(bucket, key))
            {
                return Err(Self::missing(key));
            }
            Ok(format!(
                "https://objects.test/{bucket}/{key}?expires={}",
                ttl.as_secs()
            ))
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreRequestError> {
            match self.objects.lock().unwrap().remove(&object_id(bucket, key)) {
                Some(_) => Ok(()),
                None => Err(Self::missing(key)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::memory::MemoryStore;
    use super::*;

    fn ts(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn seeded() -> (BackupStore, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let store = BackupStore::new(Arc::clone(&memory) as Arc<dyn ObjectStore>);
        (store, memory)
    }

    #[tokio::test]
    async fn test_list_sorts_newest_first() {
        let (store, memory) = seeded();
        memory.insert("vault", "backups/a.tar.gz", ts(100), 10);
        memory.insert("vault", "backups/b.tar.gz", ts(200), 20);

        let records = store.list("vault", "backups/", 200).await.unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["backups/b.tar.gz", "backups/a.tar.gz"]);
    }

    #[tokio::test]
    async fn test_list_tolerates_missing_timestamps() {
        let (store, memory) = seeded();
        memory.insert("vault", "backups/a.tar.gz", ts(100), 10);
        memory.insert("vault", "backups/b.tar.gz", None, 0);
        memory.insert("vault", "backups/c.tar.gz", ts(200), 30);

        let records = store.list("vault", "backups/", 200).await.unwrap();
        assert_eq!(records.len(), 3);

        // Wherever two timestamped records are adjacent, order is
        // non-ascending; untimestamped records must survive unharmed.
        let stamped: Vec<_> = records.iter().filter_map(|r| r.last_modified).collect();
        for pair in stamped.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert!(records.iter().any(|r| r.last_modified.is_none()));
    }

    #[tokio::test]
    async fn test_list_respects_prefix() {
        let (store, memory) = seeded();
        memory.insert("vault", "backups/a.tar.gz", ts(100), 10);
        memory.insert("vault", "other/b.tar.gz", ts(200), 20);

        let records = store.list("vault", "backups/", 200).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "backups/a.tar.gz");
    }

    #[tokio::test]
    async fn test_delete_round_trip() {
        let (store, memory) = seeded();
        memory.insert("vault", "backups/a.tar.gz", ts(100), 10);

        store.check_exists("vault", "backups/a.tar.gz").await.unwrap();
        store.delete("vault", "backups/a.tar.gz").await.unwrap();

        let err = store
            .check_exists("vault", "backups/a.tar.gz")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(key) if key == "backups/a.tar.gz"));
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_found() {
        let (store, _memory) = seeded();
        let err = store.delete("vault", "backups/missing.tar.gz").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_url_embeds_key() {
        let (store, memory) = seeded();
        memory.insert("vault", "backups/a.tar.gz", ts(100), 10);

        let url = store
            .download_url("vault", "backups/a.tar.gz", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(url.contains("backups/a.tar.gz"));
        assert!(url.contains("expires=300"));
    }
}
