//! External process capability
//!
//! Single seam through which git/gh style tooling is invoked: arguments
//! as a structured list (never interpolated strings), a hard timeout,
//! and captured output plus exit code. Killing on deadline maps to a
//! timeout-category error so callers can apply the retry policy.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::VaultError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a finished process
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands with a hard deadline
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, VaultError> {
        self.run_with_env(program, args, &[])
    }

    /// Run with extra environment variables (values are never logged)
    pub fn run_with_env(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<ProcessOutput, VaultError> {
        debug!(program, ?args, "spawning external process");

        let mut child = Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VaultError::Process(format!("failed to spawn {}: {}", program, e)))?;

        // Drain pipes on threads so a chatty child cannot deadlock on a
        // full pipe buffer while we poll for exit.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || read_all(stdout));
        let stderr_thread = std::thread::spawn(move || read_all(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        // Join the drain threads so nothing leaks
                        let _ = stdout_thread.join();
                        let _ = stderr_thread.join();
                        return Err(VaultError::Timeout(format!(
                            "{} exceeded {}s",
                            program,
                            self.timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(VaultError::Process(format!("wait on {}: {}", program, e))),
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn read_all(pipe: Option<impl Read>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(5))
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let out = runner().run("sh", &args(&["-c", "echo hello"])).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_reported_not_errored() {
        let out = runner()
            .run("sh", &args(&["-c", "echo oops >&2; exit 3"]))
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn test_deadline_kills_and_reports_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        let err = runner.run("sh", &args(&["-c", "sleep 10"])).unwrap_err();
        assert!(matches!(err, VaultError::Timeout(_)));
    }

    #[test]
    fn test_missing_program_is_process_error() {
        let err = runner()
            .run("ghvault-definitely-not-installed", &[])
            .unwrap_err();
        assert!(matches!(err, VaultError::Process(_)));
    }
}
