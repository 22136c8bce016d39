//! Blob storage for file contents.
//!
//! Metadata lives in the [`Store`](crate::store::Store); the bytes live behind a
//! [`BlobStorage`] backend and are addressed by the opaque `external_id` the
//! backend hands back from [`BlobStorage::put`].

mod local;
mod mega;

use std::io::ErrorKind;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use local::LocalStorage;
pub use mega::MegaStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,
    #[error("invalid object reference")]
    InvalidReference,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage command failed: {0}")]
    Command(String),
    #[error("storage command timed out")]
    Timeout,
}

impl StorageError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn name(&self) -> &'static str;

    /// Stores the bytes of a new file and returns the reference to fetch them by.
    async fn put(&self, owner_id: &str, file_id: &str, data: Bytes)
    -> Result<String, StorageError>;

    /// Opens a stored object, returning a reader and its size in bytes.
    async fn get(&self, external_id: &str) -> Result<(BlobReader, u64), StorageError>;

    /// Removes a stored object. Missing objects are not an error.
    async fn delete(&self, external_id: &str) -> Result<(), StorageError>;
}

/// Rejects path segments that could escape the storage root.
fn validate_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidReference);
    }
    Ok(())
}

/// Splits an `owner/file` reference into its two validated segments.
fn split_reference(external_id: &str) -> Result<(&str, &str), StorageError> {
    let (owner, file) = external_id
        .split_once('/')
        .ok_or(StorageError::InvalidReference)?;
    validate_segment(owner)?;
    validate_segment(file)?;
    Ok((owner, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("u1/f1").unwrap(), ("u1", "f1"));
        assert!(matches!(
            split_reference("u1"),
            Err(StorageError::InvalidReference)
        ));
        assert!(matches!(
            split_reference("../f1"),
            Err(StorageError::InvalidReference)
        ));
        assert!(matches!(
            split_reference("u1/a/b"),
            Err(StorageError::InvalidReference)
        ));
        assert!(matches!(
            split_reference("u1/"),
            Err(StorageError::InvalidReference)
        ));
    }
}
