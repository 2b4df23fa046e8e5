//! Backup trigger events and their snapshot classification
//!
//! Events arrive from the webhook wrapper or the CLI `--event` flag.
//! Destructive events (history can be discarded upstream) force a
//! pre-update snapshot of the live backup state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Event that triggered a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Push,
    Create,
    Release,
    ForcePush,
    BranchDelete,
    TagDelete,
    Manual,
}

/// What the snapshot manager should do before a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// No snapshot needed
    None,
    /// Copy the live state aside before the transaction touches anything
    SnapshotBeforeUpdate,
}

impl EventType {
    /// Static classification of events that can discard remote history
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        match self {
            EventType::ForcePush | EventType::BranchDelete | EventType::TagDelete => {
                SnapshotPolicy::SnapshotBeforeUpdate
            }
            EventType::Push | EventType::Create | EventType::Release | EventType::Manual => {
                SnapshotPolicy::None
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::Create => "create",
            EventType::Release => "release",
            EventType::ForcePush => "force-push",
            EventType::BranchDelete => "branch-delete",
            EventType::TagDelete => "tag-delete",
            EventType::Manual => "manual",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventType::Push),
            "create" => Ok(EventType::Create),
            "release" => Ok(EventType::Release),
            "force-push" => Ok(EventType::ForcePush),
            "branch-delete" => Ok(EventType::BranchDelete),
            "tag-delete" => Ok(EventType::TagDelete),
            "manual" => Ok(EventType::Manual),
            other => Err(VaultError::Validation(format!("unknown event type: {}", other))),
        }
    }
}
