//! Certificate lifecycle.
//!
//! Certificate material is owned by certbot; this module only reads it.
//! The lifecycle state is an explicit value computed by a single inspection
//! function ([`inspect`]) so that every filesystem-presence assumption lives
//! in one place.

pub mod issuer;
pub mod orchestrator;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::Pem;

use crate::paths::DeployPaths;

/// Proactive renewal threshold before expiry.
pub const RENEWAL_WINDOW: Duration = Duration::days(30);

/// Lifecycle state of the deployment's certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertState {
    /// No live certificate directory exists. Stale partial state under the
    /// certbot tree is deliberately ignored.
    NoCertificate,
    /// Staging issuance succeeded; production issuance pending.
    StagingIssued,
    /// A certificate exists with more than the renewal window left.
    Issued,
    /// Inside the renewal window, or the certificate is unreadable
    /// (fail-safe toward attempting renewal).
    NeedsRenewal,
    /// The renewal invocation failed; retried by the next scheduled run.
    RenewalFailed,
}

impl CertState {
    pub fn describe(self) -> &'static str {
        match self {
            CertState::NoCertificate => "no certificate",
            CertState::StagingIssued => "staging certificate issued",
            CertState::Issued => "certificate issued",
            CertState::NeedsRenewal => "renewal due",
            CertState::RenewalFailed => "renewal failed",
        }
    }
}

/// Location of the active certificate material for one domain.
#[derive(Debug, Clone)]
pub struct CertStore {
    live_dir: PathBuf,
}

impl CertStore {
    pub fn new(paths: &DeployPaths, domain: &str) -> Self {
        Self {
            live_dir: paths.live_dir(domain),
        }
    }

    /// For tests and callers that already know the live directory.
    pub fn at(live_dir: impl Into<PathBuf>) -> Self {
        Self {
            live_dir: live_dir.into(),
        }
    }

    pub fn live_dir(&self) -> &Path {
        &self.live_dir
    }

    /// The served chain; certbot keeps this as a symlink into archive/.
    pub fn fullchain(&self) -> PathBuf {
        self.live_dir.join("fullchain.pem")
    }

    pub fn exists(&self) -> bool {
        self.live_dir.is_dir()
    }
}

/// Compute the current lifecycle state from the filesystem.
///
/// This is the only place presence on disk is translated into state:
/// missing live directory means no certificate, an unreadable or
/// expiry-less certificate means renewal is due.
pub fn inspect(store: &CertStore, now: OffsetDateTime) -> CertState {
    if !store.exists() {
        return CertState::NoCertificate;
    }
    match not_after(&store.fullchain()) {
        Ok(expiry) if expiry - now >= RENEWAL_WINDOW => CertState::Issued,
        Ok(_) => CertState::NeedsRenewal,
        Err(_) => CertState::NeedsRenewal,
    }
}

/// Read the expiry timestamp from the first certificate in a PEM file.
pub fn not_after(pem_path: &Path) -> Result<OffsetDateTime> {
    let data = std::fs::read(pem_path)
        .with_context(|| format!("failed to read {}", pem_path.display()))?;
    let pem = Pem::iter_from_buffer(&data)
        .next()
        .transpose()
        .context("invalid PEM")?
        .context("no certificate in PEM file")?;
    let cert = pem.parse_x509().context("invalid x509 certificate")?;
    Ok(cert.validity().not_after.to_datetime())
}

/// Whole days until the certificate expires (negative when already expired).
pub fn days_until_expiry(store: &CertStore, now: OffsetDateTime) -> Result<i64> {
    let expiry = not_after(&store.fullchain())?;
    Ok((expiry - now).whole_days())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::fs;

    /// Mint a self-signed certificate for `domain` expiring at `not_after`
    /// into a certbot-shaped live directory under `root`.
    pub fn write_cert(root: &Path, domain: &str, not_after: OffsetDateTime) -> CertStore {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_after = not_after;
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let live_dir = root.join("live").join(domain);
        fs::create_dir_all(&live_dir).unwrap();
        fs::write(live_dir.join("fullchain.pem"), cert.pem()).unwrap();
        fs::write(live_dir.join("privkey.pem"), key.serialize_pem()).unwrap();
        CertStore::at(live_dir)
    }
}
