//! Webhook signature verification command
//!
//! Exit code carries the verdict (0 valid, 1 invalid) so shell wrappers
//! can gate on it without parsing output.

use libghvault_core::verify_signature;
use serde::Serialize;

use crate::cli::Cli;
use crate::output::{output_success, print_human};

#[derive(Serialize)]
struct VerifyOutput {
    valid: bool,
}

pub fn run(cli: &Cli, body: &str, signature: &str, secret: &str) -> i32 {
    let valid = verify_signature(body.as_bytes(), signature, secret);

    print_human(cli, if valid { "signature valid" } else { "signature invalid" });
    output_success(cli, VerifyOutput { valid });

    if valid {
        0
    } else {
        1
    }
}
