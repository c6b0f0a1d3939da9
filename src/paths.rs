//! Deployment directory layout.
//!
//! Every file and directory the tool touches hangs off one base directory,
//! so the layout is defined in a single place instead of being re-joined
//! ad hoc across phases.

use std::path::{Path, PathBuf};

/// Paths inside a deployment directory.
#[derive(Debug, Clone)]
pub struct DeployPaths {
    /// The deployment directory itself.
    pub base_dir: PathBuf,
    /// Flat key=value configuration file, shared with compose interpolation.
    pub env_file: PathBuf,
    /// Orchestration definition (n8n, nginx, certbot services).
    pub compose_file: PathBuf,
    /// Directory nginx reads site configs from (mounted into the container).
    pub nginx_conf_dir: PathBuf,
    /// The generated proxy configuration.
    pub proxy_conf: PathBuf,
    /// Certificate material root (mounted as /etc/letsencrypt).
    pub certbot_conf: PathBuf,
    /// ACME webroot served on the challenge path.
    pub certbot_www: PathBuf,
    /// Backup bundles.
    pub backups_dir: PathBuf,
    /// Log directory; the cron entry redirects renewal output here.
    pub logs_dir: PathBuf,
    /// Append-only renewal log.
    pub renew_log: PathBuf,
    /// Internal state directory.
    pub state_dir: PathBuf,
    /// Renewal overlap guard.
    pub renew_lock: PathBuf,
}

impl DeployPaths {
    /// Build the layout for a base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let nginx_conf_dir = base_dir.join("nginx/conf.d");
        let logs_dir = base_dir.join("logs");
        let state_dir = base_dir.join(".n8nctl");
        Self {
            env_file: base_dir.join(".env"),
            compose_file: base_dir.join("docker-compose.yml"),
            proxy_conf: nginx_conf_dir.join("n8n.conf"),
            certbot_conf: base_dir.join("certbot/conf"),
            certbot_www: base_dir.join("certbot/www"),
            backups_dir: base_dir.join("backups"),
            renew_log: logs_dir.join("renew.log"),
            renew_lock: state_dir.join("renew.lock"),
            nginx_conf_dir,
            logs_dir,
            state_dir,
            base_dir,
        }
    }

    /// Certbot's live directory for a domain (active certificate material).
    pub fn live_dir(&self, domain: &str) -> PathBuf {
        self.certbot_conf.join("live").join(domain)
    }

    /// Create the directories the proxy and certbot containers mount.
    ///
    /// The certbot conf tree is owned by certbot itself; only the mount
    /// points are created here.
    pub fn ensure_runtime_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.nginx_conf_dir)?;
        std::fs::create_dir_all(&self.certbot_conf)?;
        std::fs::create_dir_all(&self.certbot_www)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }
}

/// Compose project name derived from the base directory, matching the
/// default used by the compose CLI (lowercased directory name).
pub fn project_name(base_dir: &Path) -> String {
    let name: String = base_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if name.is_empty() {
        "n8n".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_hangs_off_base_dir() {
        let paths = DeployPaths::new("/srv/n8n");
        assert_eq!(paths.env_file, Path::new("/srv/n8n/.env"));
        assert_eq!(paths.proxy_conf, Path::new("/srv/n8n/nginx/conf.d/n8n.conf"));
        assert_eq!(paths.renew_lock, Path::new("/srv/n8n/.n8nctl/renew.lock"));
        assert_eq!(
            paths.live_dir("example.com"),
            Path::new("/srv/n8n/certbot/conf/live/example.com")
        );
    }

    #[test]
    fn test_project_name_sanitized() {
        assert_eq!(project_name(Path::new("/srv/N8N.Prod")), "n8nprod");
        assert_eq!(project_name(Path::new("/srv/n8n")), "n8n");
        assert_eq!(project_name(Path::new("/")), "n8n");
    }
}
