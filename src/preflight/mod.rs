//! Preflight checks for deployment prerequisites.
//!
//! Validates that the host can actually run the stack BEFORE anything is
//! mutated: required tools, a responding docker daemon, DNS pointing at this
//! host, and free proxy ports.
//!
//! # Check semantics
//!
//! - **Fail**: the run must not proceed (missing tool, port held by a
//!   foreign process).
//! - **Warn**: proceed only after operator confirmation (DNS mismatch,
//!   ports held by our own proxy). `--yes` stands in for confirmation in
//!   non-interactive runs.
//! - **Pass**: nothing to do.

mod dns;
mod ports;
mod tools;

pub use dns::check_dns;
pub use ports::check_ports;
pub use tools::{check_compose_available, check_docker_daemon, check_required_tools};

use crate::config::DeployConfig;

/// Severity of a single check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    pub status: CheckStatus,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Pass,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a warning check result (needs operator confirmation).
    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Fail,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Aggregated preflight report.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Whether any check forbids proceeding.
    pub fn is_fatal(&self) -> bool {
        self.failed_count() > 0
    }

    /// Whether any check requires operator confirmation before proceeding.
    pub fn needs_confirmation(&self) -> bool {
        self.warn_count() > 0
    }

    /// Print one line per check plus a summary.
    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Pass => "[ OK ]",
                CheckStatus::Warn => "[WARN]",
                CheckStatus::Fail => "[FAIL]",
            };
            println!("{} {}: {}", marker, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("       Suggestion: {}", suggestion);
            }
        }

        println!();
        if self.is_fatal() {
            println!(
                "Preflight checks failed: {} of {} passed, {} failed",
                self.passed_count(),
                self.total_count(),
                self.failed_count()
            );
        } else if self.needs_confirmation() {
            println!(
                "Preflight checks passed with {} warning(s) ({}/{} passed)",
                self.warn_count(),
                self.passed_count(),
                self.total_count()
            );
        } else {
            println!(
                "All preflight checks passed ({}/{})",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// Preflight checker for a configured deployment.
pub struct PreflightChecker<'a> {
    config: &'a DeployConfig,
    /// Whether our own proxy container currently holds the ports.
    proxy_running: bool,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(config: &'a DeployConfig, proxy_running: bool) -> Self {
        Self {
            config,
            proxy_running,
        }
    }

    /// Run all preflight checks and return the aggregated report.
    pub async fn run_all(&self) -> PreflightReport {
        let mut report = PreflightReport::default();

        report.checks.extend(check_required_tools());
        report.checks.push(check_docker_daemon());
        report.checks.push(check_compose_available());
        report.checks.extend(check_dns(&self.config.domain).await);
        report.checks.extend(check_ports(self.proxy_running));

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_constructors() {
        let pass = CheckResult::pass("a", "ok");
        assert_eq!(pass.status, CheckStatus::Pass);
        assert!(pass.suggestion.is_none());

        let warn = CheckResult::warn("b", "hm");
        assert_eq!(warn.status, CheckStatus::Warn);

        let fail = CheckResult::fail("c", "bad", "fix it");
        assert_eq!(fail.status, CheckStatus::Fail);
        assert!(fail.suggestion.is_some());
    }

    #[test]
    fn test_report_counters() {
        let mut report = PreflightReport::default();
        assert!(!report.is_fatal()); // Empty is OK

        report.checks.push(CheckResult::pass("a", "ok"));
        report.checks.push(CheckResult::warn("b", "hm"));
        assert!(!report.is_fatal());
        assert!(report.needs_confirmation());

        report.checks.push(CheckResult::fail("c", "bad", "fix"));
        assert!(report.is_fatal());
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.warn_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.total_count(), 3);
    }
}
