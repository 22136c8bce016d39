use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::BufReader;
use tokio::process::Command;
use uuid::Uuid;

use super::{BlobReader, BlobStorage, StorageError, split_reference, validate_segment};

const MEGA_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Stores blobs in a MEGA account through the MEGAcmd client tools.
///
/// MEGAcmd keeps its own logged-in session; this backend only shells out to
/// `mega-put`, `mega-get` and `mega-rm`. Objects land at
/// `<remote_root>/<owner>/<file>` and that remote path is the reference.
pub struct MegaStorage {
    remote_root: String,
    bin_dir: Option<PathBuf>,
    scratch_dir: PathBuf,
}

impl MegaStorage {
    pub fn new(remote_root: &str, bin_dir: Option<PathBuf>, data_dir: &Path) -> Self {
        let trimmed = remote_root.trim_matches('/');
        Self {
            remote_root: format!("/{trimmed}"),
            bin_dir,
            scratch_dir: data_dir.join("tmp"),
        }
    }

    /// Returns the account MEGAcmd is logged in as.
    pub async fn whoami(&self) -> Result<String, StorageError> {
        let output = self.run("mega-whoami", &[]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn remote_path(&self, owner_id: &str, file_id: &str) -> String {
        if self.remote_root == "/" {
            format!("/{owner_id}/{file_id}")
        } else {
            format!("{}/{owner_id}/{file_id}", self.remote_root)
        }
    }

    fn parse_reference<'a>(&self, external_id: &'a str) -> Result<(&'a str, &'a str), StorageError> {
        let relative = if self.remote_root == "/" {
            external_id.strip_prefix('/')
        } else {
            external_id
                .strip_prefix(self.remote_root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };
        split_reference(relative.ok_or(StorageError::InvalidReference)?)
    }

    fn scratch_path(&self) -> PathBuf {
        self.scratch_dir.join(Uuid::new_v4().to_string())
    }

    fn command(&self, name: &str) -> Command {
        match &self.bin_dir {
            Some(dir) => Command::new(dir.join(name)),
            None => Command::new(name),
        }
    }

    async fn run(&self, name: &str, args: &[&str]) -> Result<Output, StorageError> {
        let mut cmd = self.command(name);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn()?;

        let output = tokio::time::timeout(MEGA_COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| StorageError::Timeout)??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };

            if is_not_found(&message) {
                return Err(StorageError::NotFound);
            }
            tracing::warn!(command = name, status = %output.status, "{message}");
            return Err(StorageError::Command(format!("{name}: {message}")));
        }

        Ok(output)
    }
}

fn is_not_found(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("couldn't find") || lower.contains("no such")
}

fn path_arg(path: &Path) -> Result<&str, StorageError> {
    path.to_str().ok_or(StorageError::InvalidReference)
}

#[async_trait]
impl BlobStorage for MegaStorage {
    fn name(&self) -> &'static str {
        "mega"
    }

    async fn put(
        &self,
        owner_id: &str,
        file_id: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        validate_segment(owner_id)?;
        validate_segment(file_id)?;

        fs::create_dir_all(&self.scratch_dir).await?;
        let local = self.scratch_path();
        let local_arg = path_arg(&local)?;
        fs::write(&local, &data).await?;

        let remote = self.remote_path(owner_id, file_id);
        let result = self
            .run("mega-put", &["-c", local_arg, remote.as_str()])
            .await;

        if let Err(e) = fs::remove_file(&local).await {
            tracing::warn!("Failed to remove scratch file {}: {}", local.display(), e);
        }

        result?;
        tracing::debug!(remote = %remote, size = data.len(), "Uploaded blob to MEGA");
        Ok(remote)
    }

    async fn get(&self, external_id: &str) -> Result<(BlobReader, u64), StorageError> {
        self.parse_reference(external_id)?;

        fs::create_dir_all(&self.scratch_dir).await?;
        let local = self.scratch_path();
        let local_arg = path_arg(&local)?;

        if let Err(e) = self
            .run("mega-get", &[external_id, local_arg])
            .await
        {
            let _ = fs::remove_file(&local).await;
            return Err(e);
        }

        let file = File::open(&local).await.map_err(StorageError::from_io)?;
        let size = file.metadata().await?.len();

        // The open handle keeps the contents readable after the unlink.
        if let Err(e) = fs::remove_file(&local).await {
            tracing::warn!("Failed to remove scratch file {}: {}", local.display(), e);
        }

        Ok((Box::pin(BufReader::new(file)), size))
    }

    async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
        self.parse_reference(external_id)?;

        match self.run("mega-rm", &[external_id]).await {
            Ok(_) | Err(StorageError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_path_and_reference() {
        let storage = MegaStorage::new("/cloudvault/", None, Path::new("/data"));
        let remote = storage.remote_path("u1", "f1");
        assert_eq!(remote, "/cloudvault/u1/f1");
        assert_eq!(storage.parse_reference(&remote).unwrap(), ("u1", "f1"));

        assert!(storage.parse_reference("/other/u1/f1").is_err());
        assert!(storage.parse_reference("/cloudvault/../f1").is_err());
    }

    #[test]
    fn test_root_remote() {
        let storage = MegaStorage::new("/", None, Path::new("/data"));
        assert_eq!(storage.remote_path("u1", "f1"), "/u1/f1");
        assert_eq!(storage.parse_reference("/u1/f1").unwrap(), ("u1", "f1"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found("[API:err: 14:02:05] Couldn't find /x/y"));
        assert!(is_not_found("Node not found: /x"));
        assert!(!is_not_found("Not logged in"));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Fake MEGAcmd tools that mirror the remote tree into a local directory.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_round_trip_with_fake_megacmd() {
        use tokio::io::AsyncReadExt;

        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        let remote = temp.path().join("remote");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&remote).unwrap();
        let root = remote.display();

        write_script(
            &bin,
            "mega-put",
            &format!("mkdir -p \"$(dirname \"{root}$3\")\" && cp \"$2\" \"{root}$3\""),
        );
        write_script(
            &bin,
            "mega-get",
            &format!(
                "[ -f \"{root}$1\" ] || {{ echo \"Couldn't find $1\" >&2; exit 1; }}\ncp \"{root}$1\" \"$2\""
            ),
        );
        write_script(
            &bin,
            "mega-rm",
            &format!(
                "[ -f \"{root}$1\" ] || {{ echo \"Couldn't find $1\" >&2; exit 1; }}\nrm \"{root}$1\""
            ),
        );
        write_script(&bin, "mega-whoami", "echo 'Account e-mail: vault@example.com'");

        let storage = MegaStorage::new("/vault", Some(bin), &temp.path().join("data"));
        assert!(storage.whoami().await.unwrap().contains("vault@example.com"));

        let external_id = storage
            .put("u1", "f1", Bytes::from_static(b"remote bytes"))
            .await
            .unwrap();
        assert_eq!(external_id, "/vault/u1/f1");

        let (mut reader, size) = storage.get(&external_id).await.unwrap();
        assert_eq!(size, 12);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"remote bytes");

        storage.delete(&external_id).await.unwrap();
        storage.delete(&external_id).await.unwrap();
        assert!(matches!(
            storage.get(&external_id).await,
            Err(StorageError::NotFound)
        ));
    }
}
