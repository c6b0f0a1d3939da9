//! Deployment validation.
//!
//! A static/environmental linter over the deployment directory: artifacts
//! present with sane permissions, configuration keys filled in, tools
//! installed, renewal scheduled. It does not test certificate issuance.
//! Every check runs regardless of earlier failures so one report shows the
//! full picture.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::compose::ComposeCtl;
use crate::config::{is_well_formed_email, parse_env};
use crate::paths::DeployPaths;
use crate::preflight::{check_required_tools, CheckResult, CheckStatus};
use crate::process::exists;
use crate::schedule;

/// Aggregated validation report.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
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

    /// Whether the deployment passed (warnings allowed).
    pub fn is_ok(&self) -> bool {
        self.failed_count() == 0
    }

    /// Print one line per check plus the total/passed/failed summary.
    pub fn print_summary(&self) {
        println!("=== Validation Results ===\n");

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
        println!(
            "Total: {}  Passed: {}  Warnings: {}  Failed: {}",
            self.total_count(),
            self.passed_count(),
            self.warn_count(),
            self.failed_count()
        );
    }
}

/// Run every validation check against a deployment directory.
pub fn run(paths: &DeployPaths) -> ValidationReport {
    let mut report = ValidationReport::default();

    let domain = check_env_file(paths, &mut report.checks);
    check_compose_file(paths, &mut report.checks);
    check_proxy_conf(paths, domain.as_deref(), &mut report.checks);
    report.checks.extend(check_required_tools());
    check_cron_entry(&mut report.checks);

    report
}

/// Environment file: present, private, required keys filled. Returns the
/// configured domain so later checks can cross-reference it.
fn check_env_file(paths: &DeployPaths, checks: &mut Vec<CheckResult>) -> Option<String> {
    let path = &paths.env_file;
    if !path.exists() {
        checks.push(CheckResult::fail(
            "env file",
            format!("{} is missing", path.display()),
            "Run 'n8nctl init' to create a starter deployment",
        ));
        return None;
    }
    checks.push(CheckResult::pass("env file", format!("{} present", path.display())));

    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().mode() & 0o002 != 0 => {
            checks.push(CheckResult::fail(
                "env permissions",
                "world-writable (it holds secrets)",
                format!("chmod o-w {}", path.display()),
            ));
        }
        Ok(_) => {
            checks.push(CheckResult::pass("env permissions", "not world-writable"));
        }
        Err(e) => {
            checks.push(CheckResult::warn(
                "env permissions",
                format!("could not stat: {}", e),
            ));
        }
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            checks.push(CheckResult::fail(
                "env content",
                format!("unreadable: {}", e),
                format!("Check ownership of {}", path.display()),
            ));
            return None;
        }
    };
    let entries = parse_env(&content);
    let get = |key: &str| {
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.trim().is_empty())
    };

    let domain = get("DOMAIN");
    match &domain {
        Some(domain) => checks.push(CheckResult::pass("DOMAIN", format!("set to {}", domain))),
        None => checks.push(CheckResult::fail(
            "DOMAIN",
            "not set",
            "Edit .env and set DOMAIN",
        )),
    }

    match get("SSL_EMAIL") {
        Some(email) if is_well_formed_email(&email) => {
            checks.push(CheckResult::pass("SSL_EMAIL", format!("set to {}", email)));
        }
        Some(email) => checks.push(CheckResult::fail(
            "SSL_EMAIL",
            format!("'{}' is not a valid email address", email),
            "Edit .env and fix SSL_EMAIL",
        )),
        None => checks.push(CheckResult::fail(
            "SSL_EMAIL",
            "not set",
            "Edit .env and set SSL_EMAIL",
        )),
    }

    domain
}

/// Orchestration definition: present and, when docker is around to ask,
/// syntactically valid.
fn check_compose_file(paths: &DeployPaths, checks: &mut Vec<CheckResult>) {
    let path = &paths.compose_file;
    if !path.exists() {
        checks.push(CheckResult::fail(
            "compose file",
            format!("{} is missing", path.display()),
            "Run 'n8nctl init' to create a starter deployment",
        ));
        return;
    }
    checks.push(CheckResult::pass(
        "compose file",
        format!("{} present", path.display()),
    ));

    if !exists("docker") {
        checks.push(CheckResult::warn(
            "compose syntax",
            "docker not available; skipping the syntax check",
        ));
        return;
    }
    match ComposeCtl::detect(paths).and_then(|compose| compose.config_check()) {
        Ok(result) if result.success() => {
            checks.push(CheckResult::pass("compose syntax", "config parses"));
        }
        Ok(result) => {
            checks.push(CheckResult::fail(
                "compose syntax",
                "config does not parse",
                result.diagnostics(),
            ));
        }
        Err(e) => {
            checks.push(CheckResult::warn(
                "compose syntax",
                format!("could not check: {:#}", e),
            ));
        }
    }
}

/// Generated proxy config: present once deployed, naming the right domain.
fn check_proxy_conf(paths: &DeployPaths, domain: Option<&str>, checks: &mut Vec<CheckResult>) {
    let path = &paths.proxy_conf;
    if !path.exists() {
        checks.push(CheckResult::warn(
            "proxy config",
            format!("{} not generated yet (created by 'n8nctl deploy')", path.display()),
        ));
        return;
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match domain {
            Some(domain) if content.contains(&format!("server_name {};", domain)) => {
                checks.push(CheckResult::pass(
                    "proxy config",
                    format!("serves {}", domain),
                ));
            }
            Some(domain) => checks.push(CheckResult::fail(
                "proxy config",
                format!("does not name the configured domain {}", domain),
                "Re-run 'n8nctl deploy' to regenerate it",
            )),
            None => checks.push(CheckResult::warn(
                "proxy config",
                "present, but no domain configured to check it against",
            )),
        },
        Err(e) => checks.push(CheckResult::fail(
            "proxy config",
            format!("unreadable: {}", e),
            format!("Check ownership of {}", path.display()),
        )),
    }
}

fn check_cron_entry(checks: &mut Vec<CheckResult>) {
    if schedule::has_renew_entry() {
        checks.push(CheckResult::pass("cron entry", "renewal is scheduled"));
    } else {
        checks.push(CheckResult::warn(
            "cron entry",
            "renewal is not scheduled; certificates will expire silently",
        ));
    }
}

/// Validate one deployment directory (convenience wrapper).
pub fn run_in(base_dir: &Path) -> ValidationReport {
    run(&DeployPaths::new(base_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn find<'a>(report: &'a ValidationReport, name: &str) -> &'a CheckResult {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no check named {name}"))
    }

    #[test]
    fn test_empty_directory_fails_but_reports_everything() {
        let tmp = TempDir::new().unwrap();
        let report = run_in(tmp.path());

        assert!(!report.is_ok());
        assert_eq!(find(&report, "env file").status, CheckStatus::Fail);
        assert_eq!(find(&report, "compose file").status, CheckStatus::Fail);
        // Independent checks still ran.
        assert!(report.checks.iter().any(|c| c.name.ends_with("tool")));
        assert!(report.checks.iter().any(|c| c.name == "cron entry"));
    }

    #[test]
    fn test_missing_domain_and_email_fail_individually() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".env"), "DOMAIN=\nSSL_EMAIL=bogus\n").unwrap();
        let report = run_in(tmp.path());

        assert_eq!(find(&report, "DOMAIN").status, CheckStatus::Fail);
        assert_eq!(find(&report, "SSL_EMAIL").status, CheckStatus::Fail);
    }

    #[test]
    fn test_world_writable_env_fails() {
        let tmp = TempDir::new().unwrap();
        let env_path = tmp.path().join(".env");
        std::fs::write(&env_path, "DOMAIN=example.com\nSSL_EMAIL=ops@example.com\n").unwrap();
        let mut perms = std::fs::metadata(&env_path).unwrap().permissions();
        perms.set_mode(0o666);
        std::fs::set_permissions(&env_path, perms).unwrap();

        let report = run_in(tmp.path());
        assert_eq!(find(&report, "env permissions").status, CheckStatus::Fail);
    }

    #[test]
    fn test_proxy_conf_cross_checked_against_domain() {
        let tmp = TempDir::new().unwrap();
        let paths = DeployPaths::new(tmp.path());
        std::fs::write(&paths.env_file, "DOMAIN=example.com\nSSL_EMAIL=ops@example.com\n")
            .unwrap();
        std::fs::create_dir_all(&paths.nginx_conf_dir).unwrap();
        std::fs::write(&paths.proxy_conf, "server_name other.example.org;\n").unwrap();

        let report = run(&paths);
        assert_eq!(find(&report, "proxy config").status, CheckStatus::Fail);

        std::fs::write(&paths.proxy_conf, "server_name example.com;\n").unwrap();
        let report = run(&paths);
        assert_eq!(find(&report, "proxy config").status, CheckStatus::Pass);
    }

    #[test]
    fn test_absent_proxy_conf_is_a_warning_only() {
        let tmp = TempDir::new().unwrap();
        let paths = DeployPaths::new(tmp.path());
        std::fs::write(&paths.env_file, "DOMAIN=example.com\nSSL_EMAIL=ops@example.com\n")
            .unwrap();

        let report = run(&paths);
        assert_eq!(find(&report, "proxy config").status, CheckStatus::Warn);
    }
}
