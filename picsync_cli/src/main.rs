use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;

mod cmd;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// which picsync instance this command should run on
    #[arg(short, long, value_name = "NAME", default_value = "local")]
    instance: String,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the picsync instance config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Reconcile one remote folder for one row column
    Sync {
        /// Folder id or share URL
        folder: String,
        /// Row id that owns the images
        #[arg(long)]
        row: String,
        /// Watched column the folder reference lives in
        #[arg(long)]
        column: String,
    },
    /// Reconcile every watched row once
    Sweep,
    /// Drop all stored artifacts owned by a row
    Evict {
        /// Row id to evict
        #[arg(long)]
        row: String,
        /// Only this column; all watched columns when omitted
        #[arg(long)]
        column: Option<String>,
    },
    /// Inspect the sync ledger
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },
    /// Start the picsync service (webhook listener and periodic sweep)
    Serve,
}

#[derive(Subcommand)]
enum LedgerCmd {
    /// Show the sync record for a remote file id
    Show { remote_id: String },
    /// Find the record that owns a target key
    Find { target_key: String },
    /// List all records owned by one row column
    List {
        #[arg(long)]
        row: String,
        #[arg(long)]
        column: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Use a simple layout for configs and data:
    // - Configs under:  ~/.config/picsync/
    //   - Default instance: ~/.config/picsync/local.toml
    //   - Other instances:  ~/.config/picsync/instances/<name>.toml
    // - Data under:     ~/.local/share/picsync/
    let dirs = ProjectDirs::from("", "", "picsync")
        .context("failed to determine config directory path")?;

    let config_root = dirs.config_dir();
    let config_file = if cli.instance == "local" {
        config_root.join("local.toml")
    } else {
        config_root
            .join("instances")
            .join(&cli.instance)
            .with_extension("toml")
    };

    let local_data_dir = dirs.data_dir();

    cmd::run_command(config_file, local_data_dir, cli.cmd).await
}
