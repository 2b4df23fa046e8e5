//! Backup command implementation

use std::str::FromStr;

use libghvault_backup::{AggregateReport, BackupEngine, BackupError};
use libghvault_core::{EventType, VaultError};

use crate::cli::Cli;
use crate::output::{output_success, print_human};

pub fn run(
    cli: &Cli,
    engine: &BackupEngine,
    account: &str,
    repo: Option<&str>,
    all: bool,
    event: &str,
) -> Result<i32, BackupError> {
    let event = EventType::from_str(event).map_err(BackupError::from)?;

    if all {
        let report = engine.backup_all(account)?;
        print_aggregate(cli, &report);
        let code = report.exit_code();
        output_success(cli, report);
        return Ok(code);
    }

    let repo = repo.ok_or_else(|| {
        VaultError::Validation("a repository name is required unless --all is given".into())
    })?;
    let report = engine.backup(account, repo, event)?;

    print_human(
        cli,
        &format!(
            "{}/{}: {} ({} refs, {})",
            report.account,
            report.repo,
            report.outcome.as_str(),
            report.refs,
            human_size(report.size_bytes)
        ),
    );
    if let Some(snapshot) = &report.snapshot {
        print_human(cli, &format!("  snapshot taken: {}", snapshot));
    }
    for failure in &report.category_failures {
        print_human(cli, &format!("  metadata failure: {}", failure));
    }

    output_success(cli, report);
    Ok(0)
}

pub fn run_all_accounts(cli: &Cli, engine: &BackupEngine) -> Result<i32, BackupError> {
    let reports = engine.backup_all_accounts()?;
    let mut worst = 0;
    for report in &reports {
        print_aggregate(cli, report);
        worst = worst.max(report.exit_code());
    }
    output_success(cli, reports);
    Ok(worst)
}

fn print_aggregate(cli: &Cli, report: &AggregateReport) {
    print_human(
        cli,
        &format!(
            "{}: {} succeeded, {} partial, {} failed",
            report.account,
            report.succeeded(),
            report.partial(),
            report.failed()
        ),
    );
    for result in &report.results {
        if let Some(error) = &result.error {
            print_human(cli, &format!("  {}: {}", result.repo, error));
        }
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
