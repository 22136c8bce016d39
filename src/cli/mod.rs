mod commands;
mod info;
mod init;
mod promote;

pub use commands::AdminCommands;
pub use info::run_info;
pub use init::run_init;
pub use promote::run_promote;

use std::path::PathBuf;

use crate::store::SqliteStore;

/// Opens the store in an existing data directory.
pub fn init_store(data_dir: &str) -> anyhow::Result<SqliteStore> {
    let data_path = PathBuf::from(data_dir);
    let db_path = data_path.join("cloudvault.db");

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'cloudvault admin init' first.",
            db_path.display()
        );
    }

    SqliteStore::new(&db_path).map_err(Into::into)
}
