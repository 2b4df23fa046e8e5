//! Restore command implementation

use std::path::Path;

use libghvault_backup::{BackupEngine, BackupError};

use crate::cli::Cli;
use crate::output::{output_success, print_human};

pub fn run(
    cli: &Cli,
    engine: &BackupEngine,
    account: &str,
    repo: &str,
    target: &Path,
    snapshot: Option<&str>,
) -> Result<i32, BackupError> {
    let report = engine.restore(account, repo, target, snapshot)?;

    match &report.snapshot {
        Some(name) => print_human(
            cli,
            &format!(
                "restored {}/{} from snapshot {} to {}",
                report.account,
                report.repo,
                name,
                report.target.display()
            ),
        ),
        None => print_human(
            cli,
            &format!(
                "restored {}/{} to {}",
                report.account,
                report.repo,
                report.target.display()
            ),
        ),
    }
    if report.metadata_restored {
        print_human(cli, "  metadata copied to .ghvault-metadata/");
    }

    output_success(cli, report);
    Ok(0)
}
