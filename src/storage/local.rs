use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::{BlobReader, BlobStorage, StorageError, split_reference, validate_segment};

/// Keeps blobs on the local disk under `<data_dir>/blobs/<owner>/<file>`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            base_path: data_dir.join("blobs"),
        }
    }

    fn object_path(&self, owner_id: &str, file_id: &str) -> PathBuf {
        self.base_path.join(owner_id).join(file_id)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join("tmp").join(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        owner_id: &str,
        file_id: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        validate_segment(owner_id)?;
        validate_segment(file_id)?;

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = File::create(&temp_path).await?;
        temp_file.write_all(&data).await?;
        temp_file.sync_all().await?;

        let final_path = self.object_path(owner_id, file_id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&temp_path, &final_path).await?;

        Ok(format!("{owner_id}/{file_id}"))
    }

    async fn get(&self, external_id: &str) -> Result<(BlobReader, u64), StorageError> {
        let (owner_id, file_id) = split_reference(external_id)?;
        let path = self.object_path(owner_id, file_id);
        let file = File::open(&path).await.map_err(StorageError::from_io)?;
        let size = file.metadata().await?.len();

        Ok((Box::pin(BufReader::new(file)), size))
    }

    async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
        let (owner_id, file_id) = split_reference(external_id)?;
        let path = self.object_path(owner_id, file_id);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
