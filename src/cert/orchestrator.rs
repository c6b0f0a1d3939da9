//! Certificate lifecycle orchestration.
//!
//! Drives the state machine around the issuance service: bootstrap walks
//! staging then production issuance (a staging failure means the challenge
//! path is broken; a production-only failure usually means rate limits),
//! and the renewal path invokes the service at most once per run. Retry is
//! the scheduler's job, not this module's.

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::issuer::{Endpoint, IssuanceService};
use super::{days_until_expiry, inspect, CertState, CertStore};
use crate::config::DeployConfig;

/// Narrow seam over the proxy process for the lifecycle transitions.
pub trait ProxyHandle {
    /// Switch the served config to the TLS variant and restart the proxy.
    fn activate_tls(&self) -> Result<()>;

    /// Reload the proxy so renewed material is served.
    fn reload(&self) -> Result<()>;

    /// Best-effort reachability probe over the secure protocol.
    fn probe_https(&self) -> bool;
}

/// Outcome of a renewal run.
#[derive(Debug, PartialEq, Eq)]
pub enum RenewOutcome {
    /// More than the renewal window left; the issuance service was not
    /// invoked.
    NotNeeded { days_left: i64 },
    Renewed,
}

/// Orchestrates certificate lifecycle transitions.
pub struct CertOrchestrator<'a, I: IssuanceService, P: ProxyHandle> {
    config: &'a DeployConfig,
    store: &'a CertStore,
    issuer: &'a I,
    proxy: &'a P,
    /// States traversed this run, for reporting and assertions.
    pub trace: Vec<CertState>,
}

impl<'a, I: IssuanceService, P: ProxyHandle> CertOrchestrator<'a, I, P> {
    pub fn new(
        config: &'a DeployConfig,
        store: &'a CertStore,
        issuer: &'a I,
        proxy: &'a P,
    ) -> Self {
        Self {
            config,
            store,
            issuer,
            proxy,
            trace: Vec::new(),
        }
    }

    fn enter(&mut self, state: CertState) {
        info!(state = state.describe(), "certificate state");
        self.trace.push(state);
    }

    /// First-time issuance: staging endpoint first, then production.
    pub fn bootstrap(&mut self, now: OffsetDateTime) -> Result<()> {
        self.config.validate()?;

        let state = inspect(self.store, now);
        self.enter(state);
        match state {
            CertState::NoCertificate => {}
            CertState::Issued => {
                let days = days_until_expiry(self.store, now).unwrap_or(0);
                println!(
                    "[SKIP] certificate already issued ({} days remaining)",
                    days
                );
                return Ok(());
            }
            CertState::NeedsRenewal => {
                println!("[SKIP] certificate already issued but renewal is due");
                println!("       Run 'n8nctl renew' instead");
                return Ok(());
            }
            CertState::StagingIssued | CertState::RenewalFailed => unreachable!(),
        }

        println!("Requesting staging certificate (dry run against the test CA)...");
        self.issuer
            .issue(self.config, Endpoint::Staging)
            .context(
                "staging issuance failed - the domain validation flow is broken\n\
                 Check that DNS points here and port 80 reaches the proxy",
            )?;
        self.enter(CertState::StagingIssued);
        println!("[ OK ] staging issuance succeeded");

        println!("Requesting production certificate...");
        self.issuer
            .issue(self.config, Endpoint::Production)
            .context(
                "production issuance failed although staging succeeded\n\
                 The infrastructure is sound; this is usually a Let's Encrypt rate limit.\n\
                 See https://letsencrypt.org/docs/rate-limits/ and retry later",
            )?;
        self.enter(CertState::Issued);
        println!("[ OK ] production certificate issued");

        self.proxy
            .activate_tls()
            .context("certificate issued but switching the proxy to TLS failed")?;

        if !self.proxy.probe_https() {
            println!(
                "[WARN] {} not reachable over https yet (propagation delay is normal)",
                self.config.domain
            );
        }

        Ok(())
    }

    /// Renew when inside the renewal window; at most one issuance-service
    /// invocation per run.
    pub fn renew_if_needed(&mut self, now: OffsetDateTime) -> Result<RenewOutcome> {
        self.config.validate()?;

        let state = inspect(self.store, now);
        self.enter(state);
        match state {
            CertState::NoCertificate => {
                bail!(
                    "no certificate to renew for {}\nRun 'n8nctl ssl' first",
                    self.config.domain
                );
            }
            CertState::Issued => {
                let days_left = days_until_expiry(self.store, now).unwrap_or(0);
                return Ok(RenewOutcome::NotNeeded { days_left });
            }
            CertState::NeedsRenewal => {}
            CertState::StagingIssued | CertState::RenewalFailed => unreachable!(),
        }

        match self.issuer.renew() {
            Ok(diagnostics) => {
                self.enter(CertState::Issued);
                if !diagnostics.trim().is_empty() {
                    info!("certbot: {}", diagnostics.trim());
                }
                self.proxy
                    .reload()
                    .context("certificate renewed but the proxy reload failed")?;
                if !self.proxy.probe_https() {
                    warn!("post-renewal https probe failed (propagation delay is normal)");
                    println!(
                        "[WARN] {} not reachable over https yet (propagation delay is normal)",
                        self.config.domain
                    );
                }
                Ok(RenewOutcome::Renewed)
            }
            Err(e) => {
                self.enter(CertState::RenewalFailed);
                Err(e).context(
                    "renewal failed; the next scheduled run will retry\n\
                     Inspect the issuance log: docker compose logs certbot",
                )
            }
        }
    }
}

/// How old a lock may get before a crashed run is assumed.
const LOCK_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(6 * 3600);

/// Renewal overlap guard.
///
/// The scheduler has no overlap prevention of its own; a renewal that
/// outlives one scheduling period would otherwise race the next tick.
pub struct RenewLock {
    path: PathBuf,
}

impl RenewLock {
    /// Take the lock. Returns `None` when another live run holds it; a lock
    /// older than [`LOCK_STALE_AFTER`] is treated as left over from a crash
    /// and replaced.
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let stale = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age > LOCK_STALE_AFTER);
                if stale {
                    warn!(path = %path.display(), "replacing stale renewal lock");
                    std::fs::remove_file(path)
                        .with_context(|| format!("failed to remove stale lock {}", path.display()))?;
                    Self::acquire(path)
                } else {
                    Ok(None)
                }
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to create lock {}", path.display()))
            }
        }
    }
}

impl Drop for RenewLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::test_support::write_cert;
    use std::cell::Cell;
    use tempfile::TempDir;
    use time::Duration;

    struct FakeIssuer {
        staging_calls: Cell<u32>,
        production_calls: Cell<u32>,
        renew_calls: Cell<u32>,
        fail_staging: bool,
        fail_production: bool,
        fail_renew: bool,
    }

    impl FakeIssuer {
        fn new() -> Self {
            Self {
                staging_calls: Cell::new(0),
                production_calls: Cell::new(0),
                renew_calls: Cell::new(0),
                fail_staging: false,
                fail_production: false,
                fail_renew: false,
            }
        }
    }

    impl IssuanceService for FakeIssuer {
        fn issue(&self, _config: &DeployConfig, endpoint: Endpoint) -> Result<()> {
            match endpoint {
                Endpoint::Staging => {
                    self.staging_calls.set(self.staging_calls.get() + 1);
                    if self.fail_staging {
                        bail!("staging endpoint unreachable");
                    }
                }
                Endpoint::Production => {
                    self.production_calls.set(self.production_calls.get() + 1);
                    if self.fail_production {
                        bail!("rate limited");
                    }
                }
            }
            Ok(())
        }

        fn renew(&self) -> Result<String> {
            self.renew_calls.set(self.renew_calls.get() + 1);
            if self.fail_renew {
                bail!("challenge failed");
            }
            Ok("Congratulations, all renewals succeeded".to_string())
        }
    }

    struct FakeProxy {
        tls_activations: Cell<u32>,
        reloads: Cell<u32>,
        probe_ok: bool,
    }

    impl FakeProxy {
        fn new() -> Self {
            Self {
                tls_activations: Cell::new(0),
                reloads: Cell::new(0),
                probe_ok: true,
            }
        }
    }

    impl ProxyHandle for FakeProxy {
        fn activate_tls(&self) -> Result<()> {
            self.tls_activations.set(self.tls_activations.get() + 1);
            Ok(())
        }

        fn reload(&self) -> Result<()> {
            self.reloads.set(self.reloads.get() + 1);
            Ok(())
        }

        fn probe_https(&self) -> bool {
            self.probe_ok
        }
    }

    fn sample_config() -> DeployConfig {
        DeployConfig::parse("DOMAIN=example.com\nSSL_EMAIL=ops@example.com\n").unwrap()
    }

    #[test]
    fn test_bootstrap_walks_staging_then_production() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let store = CertStore::at(tmp.path().join("live/example.com"));
        let issuer = FakeIssuer::new();
        let proxy = FakeProxy::new();
        let now = OffsetDateTime::now_utc();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        orch.bootstrap(now).unwrap();

        assert_eq!(
            orch.trace,
            vec![
                CertState::NoCertificate,
                CertState::StagingIssued,
                CertState::Issued
            ]
        );
        assert_eq!(issuer.staging_calls.get(), 1);
        assert_eq!(issuer.production_calls.get(), 1);
        assert_eq!(proxy.tls_activations.get(), 1);
    }

    #[test]
    fn test_bootstrap_staging_failure_never_reaches_production() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let store = CertStore::at(tmp.path().join("live/example.com"));
        let mut issuer = FakeIssuer::new();
        issuer.fail_staging = true;
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        let err = orch.bootstrap(OffsetDateTime::now_utc()).unwrap_err();

        assert!(format!("{err:#}").contains("staging issuance failed"));
        assert_eq!(issuer.production_calls.get(), 0);
        assert_eq!(proxy.tls_activations.get(), 0);
        assert_eq!(orch.trace, vec![CertState::NoCertificate]);
    }

    #[test]
    fn test_bootstrap_production_failure_is_distinguished() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let store = CertStore::at(tmp.path().join("live/example.com"));
        let mut issuer = FakeIssuer::new();
        issuer.fail_production = true;
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        let err = orch.bootstrap(OffsetDateTime::now_utc()).unwrap_err();

        let report = format!("{err:#}");
        assert!(report.contains("although staging succeeded"));
        assert!(report.contains("rate limit"));
        assert_eq!(orch.trace, vec![CertState::NoCertificate, CertState::StagingIssued]);
    }

    #[test]
    fn test_bootstrap_fails_fast_on_invalid_config() {
        let tmp = TempDir::new().unwrap();
        let config = DeployConfig::parse("DOMAIN=\nSSL_EMAIL=\n").unwrap();
        let store = CertStore::at(tmp.path().join("live/example.com"));
        let issuer = FakeIssuer::new();
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        assert!(orch.bootstrap(OffsetDateTime::now_utc()).is_err());
        // No external invocation happened.
        assert_eq!(issuer.staging_calls.get(), 0);
        assert_eq!(issuer.production_calls.get(), 0);
    }

    #[test]
    fn test_renew_skips_outside_window_without_invoking_issuer() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let now = OffsetDateTime::now_utc();
        let store = write_cert(tmp.path(), "example.com", now + Duration::days(60));
        let issuer = FakeIssuer::new();
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        let outcome = orch.renew_if_needed(now).unwrap();

        assert!(
            matches!(outcome, RenewOutcome::NotNeeded { days_left } if (59..=60).contains(&days_left))
        );
        assert_eq!(issuer.renew_calls.get(), 0);
        assert_eq!(proxy.reloads.get(), 0);
    }

    #[test]
    fn test_renew_inside_window_invokes_issuer_once_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let now = OffsetDateTime::now_utc();
        let store = write_cert(tmp.path(), "example.com", now + Duration::days(5));
        let issuer = FakeIssuer::new();
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        let outcome = orch.renew_if_needed(now).unwrap();

        assert_eq!(outcome, RenewOutcome::Renewed);
        assert_eq!(issuer.renew_calls.get(), 1);
        assert_eq!(proxy.reloads.get(), 1);
        assert!(orch.trace.ends_with(&[CertState::NeedsRenewal, CertState::Issued]));
    }

    #[test]
    fn test_renew_failure_enters_renewal_failed() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let now = OffsetDateTime::now_utc();
        let store = write_cert(tmp.path(), "example.com", now + Duration::days(5));
        let mut issuer = FakeIssuer::new();
        issuer.fail_renew = true;
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        let err = orch.renew_if_needed(now).unwrap_err();

        assert!(format!("{err:#}").contains("next scheduled run will retry"));
        assert_eq!(issuer.renew_calls.get(), 1);
        assert_eq!(proxy.reloads.get(), 0);
        assert!(orch.trace.ends_with(&[CertState::RenewalFailed]));
    }

    #[test]
    fn test_renew_on_unreadable_cert_invokes_issuer() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config();
        let live_dir = tmp.path().join("live/example.com");
        std::fs::create_dir_all(&live_dir).unwrap();
        std::fs::write(live_dir.join("fullchain.pem"), "garbage").unwrap();
        let store = CertStore::at(live_dir);
        let issuer = FakeIssuer::new();
        let proxy = FakeProxy::new();

        let mut orch = CertOrchestrator::new(&config, &store, &issuer, &proxy);
        orch.renew_if_needed(OffsetDateTime::now_utc()).unwrap();
        assert_eq!(issuer.renew_calls.get(), 1);
    }

    #[test]
    fn test_lock_blocks_second_acquire_and_releases_on_drop() {
        let tmp = TempDir::new().unwrap();
        let lock_path = tmp.path().join("state/renew.lock");

        let first = RenewLock::acquire(&lock_path).unwrap();
        assert!(first.is_some());
        assert!(RenewLock::acquire(&lock_path).unwrap().is_none());

        drop(first);
        assert!(RenewLock::acquire(&lock_path).unwrap().is_some());
    }
}
