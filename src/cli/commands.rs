use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the server (create database, seed plans, create the admin account)
    Init {
        /// Data directory for the database and local blobs
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Admin email address
        #[arg(long)]
        email: Option<String>,

        /// Admin password
        #[arg(long)]
        password: Option<String>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Show server status information
    Info {
        /// Data directory for the database and local blobs
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Grant the admin role to an existing user
    Promote {
        /// Email of the user to promote
        email: String,

        /// Data directory for the database and local blobs
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}
