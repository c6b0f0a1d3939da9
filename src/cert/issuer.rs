//! Certificate issuance interface.
//!
//! Issuance and renewal are delegated to certbot, run as a one-off compose
//! container against the webroot the proxy serves on the challenge path.
//! The trait keeps the orchestrator testable without a CA in the loop.

use anyhow::{bail, Result};
use tracing::info;

use crate::compose::ComposeCtl;
use crate::config::DeployConfig;

/// ACME endpoint selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Non-production endpoint; validates the challenge flow without
    /// consuming production rate limits.
    Staging,
    Production,
}

/// Narrow seam over the external issuance service.
pub trait IssuanceService {
    /// Request a certificate for the configured domain.
    fn issue(&self, config: &DeployConfig, endpoint: Endpoint) -> Result<()>;

    /// Renew whatever is due. Returns the service's diagnostic output.
    fn renew(&self) -> Result<String>;
}

/// Path the proxy serves challenges from, inside the certbot container.
const WEBROOT: &str = "/var/www/certbot";

/// certbot driven through a one-off compose container.
pub struct CertbotIssuer<'a> {
    compose: &'a ComposeCtl,
}

impl<'a> CertbotIssuer<'a> {
    pub fn new(compose: &'a ComposeCtl) -> Self {
        Self { compose }
    }
}

impl IssuanceService for CertbotIssuer<'_> {
    fn issue(&self, config: &DeployConfig, endpoint: Endpoint) -> Result<()> {
        let mut args = vec![
            "certonly",
            "--webroot",
            "--webroot-path",
            WEBROOT,
            "--non-interactive",
            "--agree-tos",
            "--no-eff-email",
            "--email",
            config.email.as_str(),
            "-d",
            config.domain.as_str(),
        ];
        match endpoint {
            Endpoint::Staging => args.push("--staging"),
            // The staging certificate sits in the same lineage; force the
            // production issuance over it.
            Endpoint::Production => args.push("--force-renewal"),
        }

        info!(domain = %config.domain, ?endpoint, "requesting certificate");
        let result = self.compose.run_oneoff("certbot", &args)?;
        if !result.success() {
            bail!(
                "certbot certonly failed ({})\n{}",
                result.status,
                result.diagnostics()
            );
        }
        Ok(())
    }

    fn renew(&self) -> Result<String> {
        info!("invoking certbot renew");
        let result = self.compose.run_oneoff(
            "certbot",
            &[
                "renew",
                "--webroot",
                "--webroot-path",
                WEBROOT,
                "--non-interactive",
            ],
        )?;
        if !result.success() {
            bail!(
                "certbot renew failed ({})\n{}",
                result.status,
                result.diagnostics()
            );
        }
        Ok(result.diagnostics())
    }
}
