//! n8nctl CLI
//!
//! Deploys and operates an n8n instance behind an nginx reverse proxy with
//! Let's Encrypt certificates, using Docker Compose for the containers.
//!
//! # Usage
//!
//! ```bash
//! # Create a starter deployment in the current directory
//! n8nctl init
//!
//! # Preflight checks + start the stack (http, challenge-only proxy)
//! n8nctl deploy
//!
//! # Obtain certificates (staging, then production) and switch to https
//! n8nctl ssl
//!
//! # Renew when inside the 30-day window (this is what cron runs)
//! n8nctl renew
//!
//! # Install the daily renewal cron entry
//! n8nctl schedule
//!
//! # Export a backup bundle
//! n8nctl backup nightly --compress
//!
//! # Lint the deployment directory
//! n8nctl validate
//!
//! # Show current state and next steps
//! n8nctl status
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use n8nctl::backup::BackupExporter;
use n8nctl::cert::issuer::CertbotIssuer;
use n8nctl::cert::orchestrator::{CertOrchestrator, RenewLock, RenewOutcome};
use n8nctl::cert::{self, CertState, CertStore};
use n8nctl::compose::{write_starter_compose_file, ComposeCtl};
use n8nctl::config::{starter_env, DeployConfig, Protocol};
use n8nctl::paths::DeployPaths;
use n8nctl::preflight::PreflightChecker;
use n8nctl::proxy::{self, ComposeProxy, ProxyMode};
use n8nctl::{schedule, validate, Timer};

#[derive(Parser)]
#[command(name = "n8nctl")]
#[command(author, version, about = "n8n deployment orchestrator", long_about = None)]
struct Cli {
    /// Deployment directory
    #[arg(long, default_value = ".", global = true)]
    dir: PathBuf,

    /// Proceed past preflight warnings without asking
    #[arg(long, global = true)]
    yes: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter .env and docker-compose.yml
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Run preflight checks, generate the proxy config, start the stack
    Deploy,

    /// Obtain certificates (staging, then production) and switch to https
    Ssl,

    /// Renew the certificate when inside the renewal window
    Renew,

    /// Install the daily renewal cron entry
    Schedule,

    /// Export a backup bundle
    Backup {
        /// Bundle name (defaults to a UTC timestamp)
        name: Option<String>,

        /// Compress the bundle into a single archive
        #[arg(long)]
        compress: bool,
    },

    /// Lint the deployment directory
    Validate,

    /// Show deployment status and next steps
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .init();

    let paths = DeployPaths::new(&cli.dir);

    let result = match &cli.command {
        Commands::Init { force } => cmd_init(&paths, *force),
        Commands::Deploy => cmd_deploy(&paths, cli.yes).await,
        Commands::Ssl => cmd_ssl(&paths),
        Commands::Renew => cmd_renew(&paths),
        Commands::Schedule => cmd_schedule(&paths),
        Commands::Backup { name, compress } => cmd_backup(&paths, name.as_deref(), *compress),
        Commands::Validate => cmd_validate(&paths),
        Commands::Status => cmd_status(&paths),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn cmd_init(paths: &DeployPaths, force: bool) -> Result<()> {
    for file in [&paths.env_file, &paths.compose_file] {
        if file.exists() && !force {
            bail!(
                "{} already exists. Use --force to overwrite.",
                file.display()
            );
        }
    }

    std::fs::create_dir_all(&paths.base_dir)
        .with_context(|| format!("failed to create {}", paths.base_dir.display()))?;
    std::fs::write(&paths.env_file, starter_env())
        .with_context(|| format!("failed to write {}", paths.env_file.display()))?;
    write_starter_compose_file(&paths.compose_file)?;
    paths
        .ensure_runtime_dirs()
        .context("failed to create runtime directories")?;

    println!("Created {}", paths.env_file.display());
    println!("Created {}", paths.compose_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit .env: set DOMAIN and SSL_EMAIL");
    println!("  2. Run 'n8nctl deploy'");
    Ok(())
}

async fn cmd_deploy(paths: &DeployPaths, yes: bool) -> Result<()> {
    let config = DeployConfig::from_file(&paths.env_file)?;
    config.validate()?;

    // Best-effort before preflight has confirmed the tooling exists.
    let proxy_running = ComposeCtl::detect(paths)
        .map(|compose| compose.is_service_running("nginx"))
        .unwrap_or(false);

    let report = PreflightChecker::new(&config, proxy_running).run_all().await;
    report.print_summary();
    println!();
    if report.is_fatal() {
        bail!("preflight checks failed; fix the failures above and retry");
    }
    if report.needs_confirmation() && !yes {
        if !confirm("Proceed despite the warnings above?")? {
            bail!("aborted by operator");
        }
    }

    let compose = ComposeCtl::detect(paths)?;

    paths
        .ensure_runtime_dirs()
        .context("failed to create runtime directories")?;

    // Serve the challenge-only variant until a certificate exists.
    let store = CertStore::new(paths, &config.domain);
    let mode = match cert::inspect(&store, OffsetDateTime::now_utc()) {
        CertState::NoCertificate => ProxyMode::ChallengeOnly,
        _ => ProxyMode::Tls,
    };
    proxy::write_config(paths, &config, mode)?;
    let mode_name = match mode {
        ProxyMode::ChallengeOnly => "challenge-only",
        ProxyMode::Tls => "tls",
    };
    println!("[ OK ] proxy config generated ({} variant)", mode_name);

    let t = Timer::start("Stack startup");
    compose.up_detached()?;
    compose.wait_for_proxy()?;
    t.finish();

    println!();
    println!("=== Deployment Complete ===");
    match mode {
        ProxyMode::ChallengeOnly => {
            println!("  Serving http://{} (no certificate yet)", config.domain);
            println!("\nNext: n8nctl ssl");
        }
        ProxyMode::Tls => {
            println!("  Serving https://{}", config.domain);
        }
    }
    Ok(())
}

fn cmd_ssl(paths: &DeployPaths) -> Result<()> {
    let config = DeployConfig::from_file(&paths.env_file)?;
    config.validate()?;
    let compose = ComposeCtl::detect(paths)?;

    if !compose.is_service_running("nginx") {
        bail!("the proxy is not running\nRun 'n8nctl deploy' first");
    }

    let store = CertStore::new(paths, &config.domain);
    let now = OffsetDateTime::now_utc();

    // The challenge path must be servable before certbot runs.
    if cert::inspect(&store, now) == CertState::NoCertificate {
        proxy::write_config(paths, &config, ProxyMode::ChallengeOnly)?;
        compose.restart("nginx")?;
    }

    let issuer = CertbotIssuer::new(&compose);
    let proxy_handle = ComposeProxy::new(paths, &config, &compose);
    let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy_handle);
    orch.bootstrap(now)?;

    if orch.trace.last() == Some(&CertState::Issued) && config.protocol != Protocol::Https {
        // Whole-file rewrite; the config is never patched in place.
        let updated = config.with_protocol(Protocol::Https);
        updated.store(&paths.env_file)?;
        // Recreate n8n so it picks up the https webhook base.
        compose.up_detached()?;
        println!("[ OK ] configuration switched to https");
    }

    println!();
    println!("=== SSL Setup Complete ===");
    println!("  n8n: https://{}", config.domain);
    println!("\nNext: n8nctl schedule   (automatic renewal)");
    Ok(())
}

fn cmd_renew(paths: &DeployPaths) -> Result<()> {
    let config = DeployConfig::from_file(&paths.env_file)?;
    config.validate()?;

    // The scheduler has no overlap prevention; the lock is ours to take.
    let Some(_lock) = RenewLock::acquire(&paths.renew_lock)? else {
        println!("[SKIP] another renewal is already in progress");
        return Ok(());
    };

    let compose = ComposeCtl::detect(paths)?;
    let store = CertStore::new(paths, &config.domain);
    let issuer = CertbotIssuer::new(&compose);
    let proxy_handle = ComposeProxy::new(paths, &config, &compose);
    let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy_handle);

    match orch.renew_if_needed(OffsetDateTime::now_utc()) {
        Ok(RenewOutcome::NotNeeded { days_left }) => {
            println!(
                "[ OK ] certificate valid for {} more days; no renewal needed",
                days_left
            );
            Ok(())
        }
        Ok(RenewOutcome::Renewed) => {
            println!("[ OK ] certificate renewed and proxy reloaded");
            Ok(())
        }
        Err(e) => {
            // Surface the issuance service's own log tail for follow-up.
            if let Ok(logs) = compose.logs_tail("certbot", 40) {
                if !logs.trim().is_empty() {
                    eprintln!("--- certbot log tail ---");
                    eprintln!("{}", logs.trim());
                }
            }
            Err(e)
        }
    }
}

fn cmd_schedule(paths: &DeployPaths) -> Result<()> {
    schedule::install(paths)?;
    println!("\nRenewal output is appended to {}", paths.renew_log.display());
    Ok(())
}

fn cmd_backup(paths: &DeployPaths, name: Option<&str>, compress: bool) -> Result<()> {
    let config = DeployConfig::from_file(&paths.env_file)?;
    let compose = ComposeCtl::detect(paths)?;

    let t = Timer::start("Backup");
    let bundle = BackupExporter::new(paths, &config, &compose).export(name, compress)?;
    t.finish();

    println!();
    println!("=== Backup Complete ===");
    println!("  Bundle: {}", bundle.display());
    Ok(())
}

fn cmd_validate(paths: &DeployPaths) -> Result<()> {
    let report = validate::run(paths);
    report.print_summary();

    if !report.is_ok() {
        bail!("{} validation check(s) failed", report.failed_count());
    }
    Ok(())
}

fn cmd_status(paths: &DeployPaths) -> Result<()> {
    println!("n8n Deployment Status");
    println!("=====================");
    println!();

    let config = match DeployConfig::from_file(&paths.env_file) {
        Ok(config) => {
            println!("Configuration:");
            println!(
                "  Domain:      {}",
                if config.domain.is_empty() {
                    "(not set)"
                } else {
                    config.domain.as_str()
                }
            );
            println!(
                "  Email:       {}",
                if config.email.is_empty() {
                    "(not set)"
                } else {
                    config.email.as_str()
                }
            );
            println!("  Protocol:    {}", config.protocol);
            println!("  Webhook URL: {}", config.webhook_url);
            Some(config)
        }
        Err(_) => {
            println!("Configuration:   NOT FOUND (run 'n8nctl init')");
            None
        }
    };
    println!();

    println!("Artifacts:");
    if paths.compose_file.exists() {
        println!("  Compose file:    FOUND at {}", paths.compose_file.display());
    } else {
        println!("  Compose file:    NOT FOUND (run 'n8nctl init')");
    }
    if paths.proxy_conf.exists() {
        println!("  Proxy config:    FOUND at {}", paths.proxy_conf.display());
    } else {
        println!("  Proxy config:    NOT FOUND (run 'n8nctl deploy')");
    }

    let now = OffsetDateTime::now_utc();
    let cert_state = config.as_ref().map(|config| {
        let store = CertStore::new(paths, &config.domain);
        let state = cert::inspect(&store, now);
        match state {
            CertState::NoCertificate => {
                println!("  Certificate:     NOT ISSUED (run 'n8nctl ssl')");
            }
            CertState::Issued => match cert::days_until_expiry(&store, now) {
                Ok(days) => println!("  Certificate:     ISSUED ({} days remaining)", days),
                Err(_) => println!("  Certificate:     ISSUED"),
            },
            CertState::NeedsRenewal => {
                println!("  Certificate:     RENEWAL DUE (run 'n8nctl renew')");
            }
            CertState::StagingIssued | CertState::RenewalFailed => {
                println!("  Certificate:     {}", state.describe());
            }
        }
        state
    });
    println!();

    let stack_running = match ComposeCtl::detect(paths) {
        Ok(compose) => {
            let running = compose.is_service_running("nginx");
            println!("Containers:");
            match compose.ps() {
                Ok(listing) if !listing.trim().is_empty() => {
                    for line in listing.lines() {
                        println!("  {}", line);
                    }
                }
                _ => println!("  (none running)"),
            }
            running
        }
        Err(_) => {
            println!("Containers:      UNKNOWN (compose not available)");
            false
        }
    };
    println!();

    let cron_installed = schedule::has_renew_entry();
    if cron_installed {
        println!("Renewal cron:    INSTALLED");
    } else {
        println!("Renewal cron:    NOT INSTALLED (run 'n8nctl schedule')");
    }
    println!();

    println!("Next steps:");
    match (&config, cert_state) {
        (None, _) => println!("  1. Run 'n8nctl init' to create a starter deployment"),
        (Some(config), _) if config.validate().is_err() => {
            println!("  1. Edit .env: set DOMAIN and SSL_EMAIL");
        }
        _ if !stack_running => println!("  1. Run 'n8nctl deploy' to start the stack"),
        (_, Some(CertState::NoCertificate)) => {
            println!("  1. Run 'n8nctl ssl' to obtain certificates");
        }
        (_, Some(CertState::NeedsRenewal)) => {
            println!("  1. Run 'n8nctl renew' to renew the certificate");
        }
        _ if !cron_installed => {
            println!("  1. Run 'n8nctl schedule' to automate renewal");
        }
        _ => println!("  Deployment healthy. Consider 'n8nctl backup' before upgrades."),
    }

    Ok(())
}

/// Ask the operator a yes/no question.
fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read the confirmation")?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "YES"))
}
