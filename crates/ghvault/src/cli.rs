use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ghvault", about = "GitHub repository backup: mirrors, metadata, snapshots", version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Back up one repository, or every repository of an account
    Backup {
        /// Account name
        account: String,

        /// Repository name (omit with --all)
        repo: Option<String>,

        /// Back up every repository of the account
        #[arg(long, conflicts_with = "repo")]
        all: bool,

        /// Event that triggered this backup
        #[arg(long, default_value = "manual")]
        event: String,
    },

    /// Back up every repository of every configured account
    BackupAll,

    /// Show last-run status for every backed-up repository
    Status,

    /// Restore a repository to a working tree
    Restore {
        /// Account name
        account: String,

        /// Repository name
        repo: String,

        /// Target directory (must be absent or empty, outside the backup root)
        target: PathBuf,

        /// Restore from a named snapshot instead of the live backup
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Verify a webhook payload signature
    VerifyWebhook {
        /// Raw request body
        #[arg(long)]
        body: String,

        /// Signature header value (sha256=<hex>)
        #[arg(long)]
        signature: String,

        /// Shared webhook secret
        #[arg(long, env = "GHVAULT_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
    },
}
