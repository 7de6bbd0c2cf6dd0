//! Object storage.
//!
//! Objects live under two buckets: a public one served without auth
//! (media, seed blobs are private) and a private one. Object URLs on
//! the wire are bucket-relative paths of the form `/bucket/key`, with
//! an optional query string that is ignored when resolving.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("malformed object url: {0}")]
    BadUrl(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Split `/bucket/key...` into bucket and key, dropping any query string.
pub fn parse_object_url(url: &str) -> Result<(&str, &str), StorageError> {
    let path = url.split('?').next().unwrap_or(url);
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(StorageError::BadUrl(url.to_owned())),
    }
}

/// Object storage abstraction.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Base URL satellites use to download objects from this node.
    fn base_url(&self) -> &str;

    fn public_bucket(&self) -> &str;

    fn private_bucket(&self) -> &str;

    /// Store an object and return its bucket-relative URL.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<String, StorageError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete the object an URL points at. Deleting a missing object is
    /// not an error.
    async fn remove_object(&self, url: &str) -> Result<(), StorageError>;

    /// Copy every object under a bucket from another node, for media
    /// cloning during seeding.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory object storage for tests/dev.
#[derive(Debug)]
pub struct InMemoryStorage {
    base_url: String,
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc(base_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(base_url))
    }

    pub fn contains(&self, url: &str) -> bool {
        let Ok((bucket, key)) = parse_object_url(url) else {
            return false;
        };
        let objects = self.objects.read().unwrap();
        objects.contains_key(&(bucket.to_owned(), key.to_owned()))
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn public_bucket(&self) -> &str {
        "pub"
    }

    fn private_bucket(&self) -> &str {
        "prv"
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<String, StorageError> {
        let mut objects = self.objects.write().unwrap();
        objects.insert((bucket.to_owned(), key.to_owned()), body);
        Ok(format!("/{bucket}/{key}"))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let objects = self.objects.read().unwrap();
        Ok(objects.get(&(bucket.to_owned(), key.to_owned())).cloned())
    }

    async fn remove_object(&self, url: &str) -> Result<(), StorageError> {
        let (bucket, key) = parse_object_url(url)?;
        let mut objects = self.objects.write().unwrap();
        objects.remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read().unwrap();
        let mut keys: Vec<_> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
