//! # CloudVault
//!
//! A multi-tenant file storage backend that keeps file contents on MEGA,
//! usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! cloudvault = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloudvault::config::ServerConfig;
//! use cloudvault::server::{AppState, create_router};
//! use cloudvault::storage::LocalStorage;
//! use cloudvault::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let storage = LocalStorage::new(&config.data_dir);
//! let state = Arc::new(AppState::new(Arc::new(store), Arc::new(storage), config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the operator CLI. Disable with `default-features = false`.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;
