//! Core library for ghvault: configuration, error taxonomy, event
//! classification, retry/rate policies, status records, and webhook
//! signature verification. No git dependency lives here.

pub mod config;
pub mod error;
pub mod event;
pub mod process;
pub mod ratelimit;
pub mod retry;
pub mod status;
pub mod webhook;

pub use config::{AccountConfig, AuthMode, Config, Settings};
pub use error::VaultError;
pub use event::{EventType, SnapshotPolicy};
pub use process::{ProcessOutput, ProcessRunner};
pub use ratelimit::{RateLimiter, RateQuota};
pub use retry::RetryPolicy;
pub use status::{BackupStatus, Outcome, StatusEntry, StatusStore};
pub use webhook::verify_signature;
