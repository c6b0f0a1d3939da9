//! n8nctl deployment library.
//!
//! Orchestrates an n8n instance behind an nginx reverse proxy with
//! Let's Encrypt certificates, driving Docker Compose, certbot and cron
//! through their command-line interfaces. The hard problems (TLS issuance,
//! proxying, container lifecycle) stay with those tools; this crate owns the
//! workflow around them: preflight validation, certificate lifecycle,
//! proxy-config generation, scheduling, backups.

pub mod backup;
pub mod cert;
pub mod compose;
pub mod config;
pub mod paths;
pub mod preflight;
pub mod process;
pub mod proxy;
pub mod schedule;
pub mod validate;

use std::time::Instant;

/// Elapsed-time reporter for the longer phases.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Start timing a phase.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    /// Print the elapsed time for the phase.
    pub fn finish(self) {
        let secs = self.start.elapsed().as_secs_f64();
        if secs >= 60.0 {
            println!("  {} took {:.1}m", self.label, secs / 60.0);
        } else {
            println!("  {} took {:.1}s", self.label, secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_reports_without_panicking() {
        let t = Timer::start("noop");
        t.finish();
    }
}
