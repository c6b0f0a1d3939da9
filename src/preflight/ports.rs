//! Proxy port availability check.
//!
//! The proxy publishes 80 and 443 on the host. A bind probe tells whether
//! they are free. Contention is a warning requiring confirmation, never an
//! outright failure: held by our own already-running proxy a redeploy is
//! routine, and a foreign holder is for the operator to judge.

use std::net::TcpListener;

use super::CheckResult;

const PROXY_PORTS: &[u16] = &[80, 443];

/// Probe the proxy ports.
pub fn check_ports(own_proxy_running: bool) -> Vec<CheckResult> {
    PROXY_PORTS
        .iter()
        .map(|&port| check_port(port, own_proxy_running))
        .collect()
}

fn check_port(port: u16, own_proxy_running: bool) -> CheckResult {
    let name = format!("Port {}", port);
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(_listener) => CheckResult::pass(name, "Available"),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if own_proxy_running {
                CheckResult::warn(name, "Held by the deployed proxy (redeploy will take it over)")
            } else {
                CheckResult::warn(
                    name,
                    format!(
                        "Bound by another process; find it with: sudo ss -tlnp 'sport = :{}'",
                        port
                    ),
                )
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            // Unprivileged probe of a privileged port; docker itself binds
            // through the daemon, so this is not conclusive either way.
            CheckResult::warn(name, "No privilege to probe (docker binds via the daemon)")
        }
        Err(e) => CheckResult::warn(name, format!("Probe failed: {}", e)),
    }
}
