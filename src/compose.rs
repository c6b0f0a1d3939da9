//! Docker Compose interface.
//!
//! The container stack (n8n, nginx, certbot) is declared in
//! `docker-compose.yml` and driven exclusively through the compose CLI.
//! Both the standalone `docker-compose` binary and the `docker compose`
//! plugin are supported; detection happens once per invocation.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::paths::{project_name, DeployPaths};
use crate::process::{exists, Cmd, CmdResult};

/// Readiness polling: fixed count, fixed interval, no backoff.
const READY_ATTEMPTS: u32 = 10;
const READY_INTERVAL: Duration = Duration::from_secs(5);

/// Handle on the compose CLI for one deployment directory.
pub struct ComposeCtl {
    program: &'static str,
    prefix: &'static [&'static str],
    compose_file: PathBuf,
    project_dir: PathBuf,
}

impl ComposeCtl {
    /// Detect the available compose command and bind it to the deployment.
    pub fn detect(paths: &DeployPaths) -> Result<Self> {
        let (program, prefix) = detect_compose_command()?;
        debug!(program, ?prefix, "compose command detected");

        if !paths.compose_file.exists() {
            bail!(
                "orchestration definition not found: {}\nRun 'n8nctl init' to create a starter deployment",
                paths.compose_file.display()
            );
        }

        Ok(Self {
            program,
            prefix,
            compose_file: paths.compose_file.clone(),
            project_dir: paths.base_dir.clone(),
        })
    }

    fn compose_cmd(&self) -> Cmd {
        Cmd::new(self.program)
            .args(self.prefix.iter().copied())
            .arg("-f")
            .arg_path(&self.compose_file)
            .current_dir(&self.project_dir)
    }

    /// Start (or update) the stack in the background.
    pub fn up_detached(&self) -> Result<()> {
        self.compose_cmd()
            .args(["up", "-d"])
            .error_msg("failed to start the container stack")
            .run()?;
        Ok(())
    }

    /// Stop and remove the stack's containers.
    pub fn down(&self) -> Result<()> {
        self.compose_cmd()
            .arg("down")
            .error_msg("failed to stop the container stack")
            .run()?;
        Ok(())
    }

    /// Container status listing.
    pub fn ps(&self) -> Result<String> {
        let result = self.compose_cmd().arg("ps").run()?;
        Ok(result.stdout)
    }

    /// Restart one service.
    pub fn restart(&self, service: &str) -> Result<()> {
        self.compose_cmd()
            .args(["restart", service])
            .error_msg(format!("failed to restart the {} service", service))
            .run()?;
        Ok(())
    }

    /// Last `lines` log lines of one service.
    pub fn logs_tail(&self, service: &str, lines: u32) -> Result<String> {
        let result = self
            .compose_cmd()
            .args(["logs", "--no-color", "--tail"])
            .arg(lines.to_string())
            .arg(service)
            .allow_fail()
            .run()?;
        Ok(result.stdout)
    }

    /// Run a one-off container for a service (e.g. certbot). The result is
    /// returned as-is; callers inspect success and diagnostics themselves.
    pub fn run_oneoff(&self, service: &str, args: &[&str]) -> Result<CmdResult> {
        self.compose_cmd()
            .args(["run", "--rm", service])
            .args(args.iter().copied())
            .allow_fail()
            .run()
    }

    /// Execute a command inside a running service container.
    pub fn exec(&self, service: &str, args: &[&str]) -> Result<CmdResult> {
        self.compose_cmd()
            .args(["exec", "-T", service])
            .args(args.iter().copied())
            .allow_fail()
            .run()
    }

    /// Whether a service has a running container.
    pub fn is_service_running(&self, service: &str) -> bool {
        let result = self
            .compose_cmd()
            .args(["ps", "--services", "--status", "running"])
            .allow_fail()
            .run();
        match result {
            Ok(result) if result.success() => {
                result.stdout.lines().any(|line| line.trim() == service)
            }
            _ => false,
        }
    }

    /// Syntax-check the orchestration definition.
    pub fn config_check(&self) -> Result<CmdResult> {
        self.compose_cmd()
            .args(["config", "--quiet"])
            .allow_fail()
            .run()
    }

    /// Version string of the detected compose command.
    pub fn version(&self) -> Option<String> {
        let result = Cmd::new(self.program)
            .args(self.prefix.iter().copied())
            .arg("version")
            .allow_fail()
            .run()
            .ok()?;
        result
            .success()
            .then(|| result.stdout.lines().next().unwrap_or("").trim().to_string())
    }

    /// Name of the n8n data volume as docker sees it.
    pub fn data_volume(&self) -> String {
        format!("{}_n8n_data", project_name(&self.project_dir))
    }

    /// Poll until the proxy answers plain HTTP on localhost.
    ///
    /// Any HTTP response counts (the challenge-only config answers 503 on
    /// the catch-all); only a refused or timed-out connection keeps polling.
    pub fn wait_for_proxy(&self) -> Result<()> {
        for attempt in 1..=READY_ATTEMPTS {
            let probe = Cmd::new("curl")
                .args([
                    "--head",
                    "--silent",
                    "--max-time",
                    "5",
                    "--output",
                    "/dev/null",
                    "http://localhost/",
                ])
                .allow_fail()
                .run();

            if let Ok(result) = probe {
                if result.success() {
                    println!("[ OK ] proxy answering on port 80 (attempt {})", attempt);
                    return Ok(());
                }
            }

            if attempt < READY_ATTEMPTS {
                debug!(attempt, "proxy not answering yet");
                std::thread::sleep(READY_INTERVAL);
            }
        }

        bail!(
            "proxy did not answer on http://localhost/ after {} attempts\n\
             Inspect it with: docker compose logs nginx",
            READY_ATTEMPTS
        );
    }
}

/// Detect which compose command to use (standalone binary preferred,
/// plugin as fallback).
fn detect_compose_command() -> Result<(&'static str, &'static [&'static str])> {
    if exists("docker-compose") {
        return Ok(("docker-compose", &[]));
    }
    if exists("docker") {
        let probe = Cmd::new("docker")
            .args(["compose", "version"])
            .allow_fail()
            .run()?;
        if probe.success() {
            return Ok(("docker", &["compose"]));
        }
    }
    bail!(
        "no compose command available\n\
         Install the plugin (sudo apt install docker-compose-plugin) or docker-compose"
    )
}

/// Starter orchestration definition for `init`.
///
/// Values come from `.env` through compose interpolation, so the file never
/// needs regeneration when the configuration changes.
pub fn starter_compose_file() -> &'static str {
    r#"# n8n behind nginx with Let's Encrypt certificates.
# Values are interpolated from .env; edit that file, not this one.

volumes:
  n8n_data:

services:
  n8n:
    image: docker.n8n.io/n8nio/n8n
    restart: unless-stopped
    environment:
      - N8N_HOST=${DOMAIN}
      - N8N_PROTOCOL=${N8N_PROTOCOL}
      - N8N_SECURE_COOKIE=${N8N_SECURE_COOKIE}
      - WEBHOOK_URL=${WEBHOOK_URL}
      - GENERIC_TIMEZONE=${GENERIC_TIMEZONE}
    volumes:
      - n8n_data:/home/node/.n8n

  nginx:
    image: nginx:alpine
    restart: unless-stopped
    ports:
      - "80:80"
      - "443:443"
    volumes:
      - ./nginx/conf.d:/etc/nginx/conf.d:ro
      - ./certbot/www:/var/www/certbot:ro
      - ./certbot/conf:/etc/letsencrypt:ro
    depends_on:
      - n8n

  # Invoked via 'run --rm'; the default command keeps 'up' harmless.
  certbot:
    image: certbot/certbot
    restart: "no"
    command: ["--version"]
    volumes:
      - ./certbot/www:/var/www/certbot
      - ./certbot/conf:/etc/letsencrypt
"#
}

/// Write the starter compose file for `init`.
pub fn write_starter_compose_file(path: &Path) -> Result<()> {
    std::fs::write(path, starter_compose_file())
        .with_context(|| format!("failed to write {}", path.display()))
}
