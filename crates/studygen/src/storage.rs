//! Object storage contract.
//!
//! The orchestrator never reads file contents. It only asks for a URL the
//! text-extraction worker can download the file from.

use thiserror::Error;

use crate::model::{FileId, FileRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("File {file_id} has no usable object location: {reason}")]
    InvalidObject { file_id: FileId, reason: String },
}

/// Resolves a stored file to an access URL.
pub trait FileLocator: Send + Sync {
    fn locate(&self, file: &FileRecord) -> Result<String, StorageError>;
}

/// Builds `{base}/{bucket}/{key}` URLs for publicly readable buckets.
///
/// Bucket and key are percent-encoded per path segment; `/` in a key is kept
/// as a separator.
#[derive(Debug, Clone)]
pub struct PublicUrlLocator {
    base_url: String,
}

impl PublicUrlLocator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl FileLocator for PublicUrlLocator {
    fn locate(&self, file: &FileRecord) -> Result<String, StorageError> {
        let bucket = file.bucket.trim_matches('/');
        let key = file.object_key.trim_start_matches('/');
        if bucket.is_empty() {
            return Err(StorageError::InvalidObject {
                file_id: file.id,
                reason: "empty bucket".to_string(),
            });
        }
        if key.is_empty() {
            return Err(StorageError::InvalidObject {
                file_id: file.id,
                reason: "empty object key".to_string(),
            });
        }
        let key = key
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(bucket),
            key
        ))
    }
}
