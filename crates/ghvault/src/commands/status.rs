//! Status command implementation

use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use libghvault_backup::{BackupEngine, BackupError};
use libghvault_core::BackupStatus;

use crate::cli::Cli;
use crate::commands::backup::human_size;
use crate::output::output_success;

pub fn run(cli: &Cli, engine: &BackupEngine) -> Result<i32, BackupError> {
    let entries = engine.status_store().list()?;

    if !cli.json && !cli.quiet {
        if entries.is_empty() {
            println!("no backups found under {}", engine.config().backup_root.display());
        } else {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec![
                "", "Account", "Repository", "Last backup", "Outcome", "Size", "Event",
            ]);
            for entry in &entries {
                match &entry.status {
                    Some(status) => table.add_row(vec![
                        Cell::new(freshness_marker(status)),
                        Cell::new(&entry.account),
                        Cell::new(&entry.repo),
                        Cell::new(format_age(status)),
                        Cell::new(status.outcome.as_str()),
                        Cell::new(human_size(status.size_bytes)),
                        Cell::new(status.event.as_str()),
                    ]),
                    None => table.add_row(vec![
                        Cell::new("?"),
                        Cell::new(&entry.account),
                        Cell::new(&entry.repo),
                        Cell::new("never"),
                        Cell::new("-"),
                        Cell::new("-"),
                        Cell::new("-"),
                    ]),
                };
            }
            println!("{}", table);
        }
    }

    output_success(cli, entries);
    Ok(0)
}

/// Age-based freshness marker: recent success, aging, or trouble
fn freshness_marker(status: &BackupStatus) -> &'static str {
    use libghvault_core::Outcome;
    let age_days = (Utc::now() - status.last_backup).num_days();
    match status.outcome {
        Outcome::Failed => "✗",
        Outcome::Partial => "⚠",
        Outcome::Success if age_days >= 7 => "⚠",
        Outcome::Success => "✓",
    }
}

fn format_age(status: &BackupStatus) -> String {
    let age = Utc::now() - status.last_backup;
    if age.num_days() >= 1 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() >= 1 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}m ago", age.num_minutes().max(0))
    }
}
