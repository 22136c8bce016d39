use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudvault::cli::{AdminCommands, run_info, run_init, run_promote};
use cloudvault::config::{ServerConfig, StorageConfig};
use cloudvault::server::{AppState, create_router};
use cloudvault::storage::{BlobStorage, LocalStorage, MegaStorage};
use cloudvault::store::{SqliteStore, Store, seed_default_plans};

#[derive(Parser)]
#[command(name = "cloudvault")]
#[command(about = "A multi-tenant file storage server backed by MEGA", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// TOML config file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and local blobs
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn load_config(
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }

    Ok(config)
}

async fn open_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn BlobStorage>> {
    match &config.storage {
        StorageConfig::Local => {
            info!("Storing files under {}", config.data_dir.join("blobs").display());
            Ok(Arc::new(LocalStorage::new(&config.data_dir)))
        }
        StorageConfig::Mega {
            remote_root,
            bin_dir,
        } => {
            let storage = MegaStorage::new(remote_root, bin_dir.clone(), &config.data_dir);
            let account = storage.whoami().await.map_err(|e| {
                anyhow::anyhow!("MEGAcmd is not ready ({e}). Log in with 'mega-login' first.")
            })?;
            info!("Storing files on MEGA as {account} under {remote_root}");
            Ok(Arc::new(storage))
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let seeded = seed_default_plans(&store)?;
    if !seeded.is_empty() {
        info!("Seeded {} default plan(s)", seeded.len());
    }

    if !store.has_admin_user()? {
        tracing::warn!("No admin account exists. Run 'cloudvault admin init' to create one.");
    }

    let storage = open_storage(&config).await?;
    let addr = config.socket_addr()?;
    let sweep_interval = config.temp_key_sweep_interval();

    let state = Arc::new(AppState::new(Arc::new(store), storage, config));
    let _sweeper = state.temp_keys.spawn_sweeper(sweep_interval);

    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cloudvault=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                email,
                password,
                non_interactive,
            } => run_init(data_dir, email, password, non_interactive)?,
            AdminCommands::Info { data_dir, json } => run_info(data_dir, json)?,
            AdminCommands::Promote { email, data_dir } => run_promote(data_dir, email)?,
        },
        Commands::Serve {
            config,
            host,
            port,
            data_dir,
        } => {
            let config = load_config(config, host, port, data_dir)?;
            serve(config).await?;
        }
    }

    Ok(())
}
