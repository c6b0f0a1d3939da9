//! DNS resolution check.
//!
//! Verifies the configured domain resolves at all, then compares the
//! resolved addresses against this host's public address. Both problems are
//! warnings, not failures: the operator may be deploying behind NAT or
//! before a DNS cutover, and can confirm to proceed. Certificate issuance
//! will fail loudly on its own if the domain really is unreachable.

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use super::CheckResult;

/// Resolve the domain and compare against the host's public address.
pub async fn check_dns(domain: &str) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    let resolved = match resolve(domain).await {
        Ok(addrs) if !addrs.is_empty() => {
            checks.push(CheckResult::pass(
                "DNS",
                format!("{} resolves to {}", domain, format_addrs(&addrs)),
            ));
            addrs
        }
        Ok(_) => {
            checks.push(CheckResult::warn(
                "DNS",
                format!(
                    "{} has no A/AAAA records; create one pointing at this host before 'n8nctl ssl'",
                    domain
                ),
            ));
            return checks;
        }
        Err(e) => {
            checks.push(CheckResult::warn(
                "DNS",
                format!(
                    "{} does not resolve ({}); create an A record pointing at this host before 'n8nctl ssl'",
                    domain, e
                ),
            ));
            return checks;
        }
    };

    match public_ip().await {
        Some(host_ip) => {
            if resolved.contains(&host_ip) {
                checks.push(CheckResult::pass(
                    "DNS target",
                    format!("Domain points at this host ({})", host_ip),
                ));
            } else {
                checks.push(CheckResult::warn(
                    "DNS target",
                    format!(
                        "Domain resolves to {} but this host's public address is {}",
                        format_addrs(&resolved),
                        host_ip
                    ),
                ));
            }
        }
        None => {
            checks.push(CheckResult::warn(
                "DNS target",
                "Could not determine this host's public address; skipping the comparison",
            ));
        }
    }

    checks
}

async fn resolve(domain: &str) -> anyhow::Result<Vec<IpAddr>> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
    let lookup = resolver.lookup_ip(domain).await?;
    Ok(lookup.iter().collect())
}

/// Ask an external reflector for this host's public address.
async fn public_ip() -> Option<IpAddr> {
    let output = tokio::process::Command::new("curl")
        .args([
            "--silent",
            "--fail",
            "--max-time",
            "10",
            "https://api.ipify.org",
        ])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!("public IP lookup failed: {:?}", output.status);
        return None;
    }

    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

fn format_addrs(addrs: &[IpAddr]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_addrs() {
        let addrs: Vec<IpAddr> = vec!["192.0.2.1".parse().unwrap(), "192.0.2.2".parse().unwrap()];
        assert_eq!(format_addrs(&addrs), "192.0.2.1, 192.0.2.2");
    }

    #[tokio::test]
    async fn test_unresolvable_domain_warns() {
        let checks = check_dns("does-not-exist.invalid").await;
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, super::super::CheckStatus::Warn);
    }
}
