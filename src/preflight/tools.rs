//! Host tool validation.
//!
//! Checks that required external tools are installed and that the docker
//! side (daemon + compose) actually responds, not just resolves on PATH.

use super::CheckResult;
use crate::process::{which, Cmd};

/// Required host tools with their install suggestions.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("docker", "Run the container stack", "https://docs.docker.com/engine/install/"),
    ("curl", "Reachability probes and public IP lookup", "sudo apt install curl"),
    ("crontab", "Schedule automatic renewal", "sudo apt install cron"),
    ("tar", "Backup archiving", "sudo apt install tar"),
];

/// Check that all required host tools are installed.
pub fn check_required_tools() -> Vec<CheckResult> {
    REQUIRED_TOOLS
        .iter()
        .map(|(tool, purpose, install)| check_tool(tool, purpose, install))
        .collect()
}

fn check_tool(tool: &str, purpose: &str, install: &str) -> CheckResult {
    match which(tool) {
        Some(path) => CheckResult::pass(
            format!("{} tool", tool),
            format!("Found at {} ({})", path.display(), purpose),
        ),
        None => CheckResult::fail(
            format!("{} tool", tool),
            format!("Not found (needed for: {})", purpose),
            install,
        ),
    }
}

/// Check that the docker daemon is up and the current user may talk to it.
pub fn check_docker_daemon() -> CheckResult {
    let result = Cmd::new("docker").arg("info").allow_fail().run();

    match result {
        Ok(result) if result.success() => {
            CheckResult::pass("Docker daemon", "Responding".to_string())
        }
        Ok(result) => CheckResult::fail(
            "Docker daemon",
            "Not responding",
            if result.stderr.contains("permission denied") {
                "Add your user to the docker group: sudo usermod -aG docker $USER (then re-login)"
            } else {
                "Start it: sudo systemctl start docker"
            },
        ),
        Err(_) => CheckResult::fail(
            "Docker daemon",
            "docker binary could not be executed",
            "https://docs.docker.com/engine/install/",
        ),
    }
}

/// Check that some compose command is available (standalone or plugin).
pub fn check_compose_available() -> CheckResult {
    if which("docker-compose").is_some() {
        return CheckResult::pass("Compose", "docker-compose found");
    }

    let plugin = Cmd::new("docker")
        .args(["compose", "version"])
        .allow_fail()
        .run();
    match plugin {
        Ok(result) if result.success() => {
            CheckResult::pass("Compose", "docker compose plugin found")
        }
        _ => CheckResult::fail(
            "Compose",
            "Neither docker-compose nor the docker compose plugin is available",
            "sudo apt install docker-compose-plugin",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_required_tools_returns_all_rows() {
        let results = check_required_tools();
        assert_eq!(results.len(), REQUIRED_TOOLS.len());
    }

    #[test]
    fn test_check_tool_missing_has_suggestion() {
        let result = check_tool("definitely_not_a_real_command_12345", "testing", "install it");
        assert_eq!(result.status, super::super::CheckStatus::Fail);
        assert_eq!(result.suggestion.as_deref(), Some("install it"));
    }
}
