mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use libghvault_backup::{BackupEngine, BackupError};
use libghvault_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::output_error(&cli, &e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: &Cli) -> Result<i32, BackupError> {
    // Webhook verification is self-contained; everything else needs config
    if let Command::VerifyWebhook {
        body,
        signature,
        secret,
    } = &cli.command
    {
        return Ok(commands::verify::run(cli, body, signature, secret));
    }

    let config = Config::load(&cli.config)?;
    let engine = BackupEngine::new(config);

    match &cli.command {
        Command::Backup {
            account,
            repo,
            all,
            event,
        } => commands::backup::run(cli, &engine, account, repo.as_deref(), *all, event),
        Command::BackupAll => commands::backup::run_all_accounts(cli, &engine),
        Command::Status => commands::status::run(cli, &engine),
        Command::Restore {
            account,
            repo,
            target,
            snapshot,
        } => commands::restore::run(cli, &engine, account, repo, target, snapshot.as_deref()),
        Command::VerifyWebhook { .. } => unreachable!("handled above"),
    }
}
