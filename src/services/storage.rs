use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Object storage for uploaded bookshelf photos.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket_name(&self) -> &str;

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete an object. Returns `StorageError::NotFound` if it was already gone.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Object key for a job's source image.
pub fn image_key(owner_id: &str, job_token: &str, content_type: &str) -> String {
    let ext = match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    };
    format!("detections/{}/{}.{}", owner_id, job_token, ext)
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        code => Err(StorageError::Status(code)),
    }
}

fn map_s3_error(key: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::S3(other),
    }
}

#[async_trait]
impl BlobStore for R2Client {
    fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(key, response.status_code())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(key, response.status_code())
    }
}

/// Blob store held in process memory.
pub struct MemoryBlobStore {
    bucket: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket_name(&self) -> &str {
        &self.bucket
    }

    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
