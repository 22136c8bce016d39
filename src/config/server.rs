use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Largest accepted request body for uploads.
    pub max_upload_bytes: u64,
    pub session_ttl_hours: i64,
    pub temp_key_ttl_secs: u64,
    pub temp_key_sweep_secs: u64,
    pub storage: StorageConfig,
}

/// Where file contents go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local,
    Mega {
        #[serde(default = "default_remote_root")]
        remote_root: String,
        /// Directory holding the MEGAcmd scripts, when they are not on PATH.
        #[serde(default)]
        bin_dir: Option<PathBuf>,
    },
}

fn default_remote_root() -> String {
    "/cloudvault".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local
    }
}

impl ServerConfig {
    /// Reads a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("cloudvault.db")
    }

    #[must_use]
    pub fn temp_key_ttl(&self) -> Duration {
        Duration::from_secs(self.temp_key_ttl_secs)
    }

    #[must_use]
    pub fn temp_key_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.temp_key_sweep_secs.max(1))
    }

    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            max_upload_bytes: 512 * MIB,
            session_ttl_hours: 24 * 30,
            temp_key_ttl_secs: 24 * 60 * 60,
            temp_key_sweep_secs: 5 * 60,
            storage: StorageConfig::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.temp_key_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.temp_key_sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.storage, StorageConfig::Local);
        assert_eq!(config.db_path(), PathBuf::from("./data/cloudvault.db"));
    }

    #[test]
    fn test_mega_backend() {
        let config = ServerConfig::from_toml(
            r#"
            port = 9000
            data_dir = "/var/lib/cloudvault"

            [storage]
            backend = "mega"
            bin_dir = "/opt/megacmd"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(
            config.storage,
            StorageConfig::Mega {
                remote_root: "/cloudvault".to_string(),
                bin_dir: Some(PathBuf::from("/opt/megacmd")),
            }
        );
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = ServerConfig::from_toml("[storage]\nbackend = \"s3\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
