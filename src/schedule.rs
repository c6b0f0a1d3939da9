//! Scheduled renewal installation.
//!
//! Registers one cron entry that invokes the renewal phase daily, with
//! output appended to the renewal log. Installation is idempotent: existing
//! entries referencing the renewal phase are replaced, never duplicated.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::debug;

use crate::paths::DeployPaths;
use crate::process::{exists, Cmd};

/// Substring identifying our entry in a crontab. Replacement keys off this,
/// so it must appear in every entry [`renew_entry`] produces.
pub const RENEW_MARKER: &str = "n8nctl renew";

/// Daily at 03:17; an off-peak minute away from the top-of-hour stampede
/// the CA sees.
const SCHEDULE: &str = "17 3 * * *";

/// systemd unit names the cron daemon goes by across distributions.
const CRON_UNITS: &[&str] = &["cron", "crond", "cronie"];

/// The canonical cron entry for a deployment.
pub fn renew_entry(base_dir: &Path, exe: &Path, log: &Path) -> String {
    format!(
        "{} cd {} && {} renew --yes >> {} 2>&1",
        SCHEDULE,
        base_dir.display(),
        exe.display(),
        log.display()
    )
}

/// Replace-if-exists insertion of the renewal entry into crontab content.
///
/// Pure text transformation; installing twice yields exactly one entry.
pub fn upsert_renew_entry(existing: &str, entry: &str) -> String {
    let mut lines: Vec<&str> = existing
        .lines()
        .filter(|line| !line.contains(RENEW_MARKER))
        .collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(entry);
    out.push('\n');
    out
}

/// Install the renewal entry into the current user's crontab.
pub fn install(paths: &DeployPaths) -> Result<()> {
    ensure_cron_daemon()?;

    let exe = std::env::current_exe().context("cannot determine the executable path")?;
    let base_dir = std::fs::canonicalize(&paths.base_dir)
        .with_context(|| format!("failed to resolve {}", paths.base_dir.display()))?;
    std::fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;

    let entry = renew_entry(&base_dir, &exe, &paths.renew_log);

    // No crontab yet exits non-zero; treat that as empty.
    let current = Cmd::new("crontab").arg("-l").allow_fail().run()?;
    let existing = if current.success() {
        current.stdout
    } else {
        debug!("no existing crontab");
        String::new()
    };

    let updated = upsert_renew_entry(&existing, &entry);

    std::fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let staged = paths.state_dir.join("crontab.new");
    std::fs::write(&staged, &updated)
        .with_context(|| format!("failed to write {}", staged.display()))?;
    Cmd::new("crontab")
        .arg_path(&staged)
        .error_msg("failed to install the crontab")
        .run()?;
    let _ = std::fs::remove_file(&staged);

    println!("[ OK ] cron entry installed:");
    println!("       {}", entry);
    Ok(())
}

/// Whether a renewal entry is present in the current user's crontab.
pub fn has_renew_entry() -> bool {
    Cmd::new("crontab")
        .arg("-l")
        .allow_fail()
        .run()
        .map(|result| result.success() && result.stdout.contains(RENEW_MARKER))
        .unwrap_or(false)
}

/// Verify the cron daemon is active, starting it when it is not.
fn ensure_cron_daemon() -> Result<()> {
    if !exists("systemctl") {
        println!("[WARN] systemctl not available; verify the cron daemon is running yourself");
        return Ok(());
    }

    for unit in CRON_UNITS {
        let active = Cmd::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .allow_fail()
            .run()?;
        if active.success() {
            debug!(unit, "cron daemon active");
            return Ok(());
        }
    }

    println!("[WARN] cron daemon not active; attempting to start it");
    for unit in CRON_UNITS {
        let started = Cmd::new("systemctl")
            .args(["start", unit])
            .allow_fail()
            .run()?;
        if started.success() {
            println!("[ OK ] started {}", unit);
            return Ok(());
        }
    }

    bail!(
        "no cron daemon is active and none could be started (tried: {})\n\
         Install one: sudo apt install cron",
        CRON_UNITS.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_entry() -> String {
        renew_entry(
            &PathBuf::from("/srv/n8n"),
            &PathBuf::from("/usr/local/bin/n8nctl"),
            &PathBuf::from("/srv/n8n/logs/renew.log"),
        )
    }

    #[test]
    fn test_entry_carries_marker_schedule_and_redirect() {
        let entry = sample_entry();
        assert!(entry.contains(RENEW_MARKER));
        assert!(entry.starts_with(SCHEDULE));
        assert!(entry.ends_with(">> /srv/n8n/logs/renew.log 2>&1"));
    }

    #[test]
    fn test_upsert_into_empty_crontab() {
        let entry = sample_entry();
        let updated = upsert_renew_entry("", &entry);
        assert_eq!(updated, format!("{}\n", entry));
    }

    #[test]
    fn test_upsert_preserves_unrelated_entries() {
        let entry = sample_entry();
        let existing = "0 0 * * * /usr/bin/unrelated\n";
        let updated = upsert_renew_entry(existing, &entry);
        assert!(updated.contains("/usr/bin/unrelated"));
        assert!(updated.contains(&entry));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let entry = sample_entry();
        let once = upsert_renew_entry("0 0 * * * /usr/bin/unrelated\n", &entry);
        let twice = upsert_renew_entry(&once, &entry);
        assert_eq!(once, twice);
        let count = twice.lines().filter(|l| l.contains(RENEW_MARKER)).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upsert_replaces_outdated_entry() {
        let stale = "0 5 * * * cd /old/place && /old/n8nctl renew >> /old/log 2>&1\n";
        let entry = sample_entry();
        let updated = upsert_renew_entry(stale, &entry);
        assert!(!updated.contains("/old/place"));
        assert_eq!(
            updated.lines().filter(|l| l.contains(RENEW_MARKER)).count(),
            1
        );
    }
}
