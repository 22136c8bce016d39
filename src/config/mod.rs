mod server;

pub use server::{ServerConfig, StorageConfig};
