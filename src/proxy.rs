//! Proxy configuration generation.
//!
//! Emits the nginx site config in one of two mutually exclusive variants:
//! challenge-only (plain HTTP, serves the ACME path while no certificate
//! exists) and TLS-terminating. Rendering is a pure function of the
//! configuration and mode; the file is always overwritten wholesale and the
//! caller reloads the proxy afterwards.

use anyhow::{Context, Result};

use crate::cert::orchestrator::ProxyHandle;
use crate::compose::ComposeCtl;
use crate::config::DeployConfig;
use crate::paths::DeployPaths;
use crate::process::Cmd;

/// Which variant to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Port 80 only: ACME challenge path plus a placeholder catch-all.
    ChallengeOnly,
    /// Full TLS termination in front of the backend.
    Tls,
}

const CHALLENGE_TEMPLATE: &str = r#"# Generated by n8nctl; regenerated on every certificate transition. Do not edit.
server {
    listen 80;
    listen [::]:80;
    server_name {domain};

    location /.well-known/acme-challenge/ {
        root /var/www/certbot;
    }

    location / {
        default_type text/plain;
        return 503 "certificate provisioning in progress, retry shortly\n";
    }
}
"#;

const TLS_TEMPLATE: &str = r#"# Generated by n8nctl; regenerated on every certificate transition. Do not edit.
server {
    listen 80;
    listen [::]:80;
    server_name {domain};

    location /.well-known/acme-challenge/ {
        root /var/www/certbot;
    }

    location / {
        return 301 https://$host$request_uri;
    }
}

server {
    listen 443 ssl;
    listen [::]:443 ssl;
    http2 on;
    server_name {domain};

    ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;
    ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305;
    ssl_prefer_server_ciphers off;
    ssl_session_cache shared:SSL:10m;
    ssl_session_timeout 1d;

    add_header X-Frame-Options DENY always;
    add_header X-Content-Type-Options nosniff always;
    add_header Strict-Transport-Security "max-age=31536000; includeSubDomains" always;
    add_header Referrer-Policy strict-origin-when-cross-origin always;

    client_max_body_size 16m;

    gzip on;
    gzip_types text/plain text/css text/xml application/json application/javascript application/xml;

    # Webhook traffic gets a tighter budget than the editor UI.
    location /webhook/ {
        proxy_pass http://n8n:5678;
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_connect_timeout 30s;
        proxy_send_timeout 120s;
        proxy_read_timeout 120s;
    }

    location / {
        proxy_pass http://n8n:5678;
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_connect_timeout 30s;
        proxy_send_timeout 300s;
        proxy_read_timeout 300s;
    }
}
"#;

/// Render the site config for a mode. Pure: identical inputs produce
/// byte-identical output.
pub fn render(config: &DeployConfig, mode: ProxyMode) -> String {
    let template = match mode {
        ProxyMode::ChallengeOnly => CHALLENGE_TEMPLATE,
        ProxyMode::Tls => TLS_TEMPLATE,
    };
    template.replace("{domain}", &config.domain)
}

/// Overwrite the served site config. At most one variant exists at a time;
/// the caller is responsible for reloading the proxy.
pub fn write_config(paths: &DeployPaths, config: &DeployConfig, mode: ProxyMode) -> Result<()> {
    std::fs::create_dir_all(&paths.nginx_conf_dir).with_context(|| {
        format!("failed to create {}", paths.nginx_conf_dir.display())
    })?;
    std::fs::write(&paths.proxy_conf, render(config, mode))
        .with_context(|| format!("failed to write {}", paths.proxy_conf.display()))
}

/// The deployed proxy: config regeneration plus container pokes.
pub struct ComposeProxy<'a> {
    paths: &'a DeployPaths,
    config: &'a DeployConfig,
    compose: &'a ComposeCtl,
}

impl<'a> ComposeProxy<'a> {
    pub fn new(paths: &'a DeployPaths, config: &'a DeployConfig, compose: &'a ComposeCtl) -> Self {
        Self {
            paths,
            config,
            compose,
        }
    }
}

impl ProxyHandle for ComposeProxy<'_> {
    fn activate_tls(&self) -> Result<()> {
        write_config(self.paths, self.config, ProxyMode::Tls)?;
        // A restart (not reload) so the listener set changes take effect.
        self.compose.restart("nginx")
    }

    fn reload(&self) -> Result<()> {
        let result = self.compose.exec("nginx", &["nginx", "-s", "reload"])?;
        if result.success() {
            Ok(())
        } else {
            // exec can fail while the container is being recreated; a
            // restart serves the same purpose.
            self.compose.restart("nginx")
        }
    }

    fn probe_https(&self) -> bool {
        Cmd::new("curl")
            .args([
                "--head",
                "--silent",
                "--fail",
                "--max-time",
                "10",
                "--output",
                "/dev/null",
            ])
            .arg(format!("https://{}/healthz", self.config.domain))
            .allow_fail()
            .run()
            .map(|result| result.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DeployConfig {
        DeployConfig::parse("DOMAIN=example.com\nSSL_EMAIL=ops@example.com\n").unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let config = sample_config();
        assert_eq!(
            render(&config, ProxyMode::Tls),
            render(&config, ProxyMode::Tls)
        );
        assert_eq!(
            render(&config, ProxyMode::ChallengeOnly),
            render(&config, ProxyMode::ChallengeOnly)
        );
    }

    #[test]
    fn test_challenge_mode_never_references_certificates() {
        let rendered = render(&sample_config(), ProxyMode::ChallengeOnly);
        assert!(!rendered.contains("ssl_certificate"));
        assert!(!rendered.contains("privkey.pem"));
        assert!(!rendered.contains("listen 443"));
        assert!(rendered.contains("/.well-known/acme-challenge/"));
        assert!(rendered.contains("server_name example.com;"));
    }

    #[test]
    fn test_tls_mode_references_certificate_material() {
        let rendered = render(&sample_config(), ProxyMode::Tls);
        assert!(rendered.contains("ssl_certificate /etc/letsencrypt/live/example.com/fullchain.pem;"));
        assert!(rendered.contains("ssl_certificate_key /etc/letsencrypt/live/example.com/privkey.pem;"));
        assert!(rendered.contains("ssl_protocols TLSv1.2 TLSv1.3;"));
    }

    #[test]
    fn test_tls_mode_carries_security_headers() {
        let rendered = render(&sample_config(), ProxyMode::Tls);
        assert!(rendered.contains("X-Frame-Options DENY"));
        assert!(rendered.contains("X-Content-Type-Options nosniff"));
        assert!(rendered.contains("Strict-Transport-Security"));
        assert!(rendered.contains("Referrer-Policy"));
    }

    #[test]
    fn test_tls_mode_forwards_and_upgrades() {
        let rendered = render(&sample_config(), ProxyMode::Tls);
        assert!(rendered.contains("proxy_pass http://n8n:5678;"));
        assert!(rendered.contains("proxy_set_header X-Forwarded-Proto $scheme;"));
        assert!(rendered.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(rendered.contains("proxy_set_header Connection \"upgrade\";"));
    }

    #[test]
    fn test_webhook_budget_tighter_than_general() {
        let rendered = render(&sample_config(), ProxyMode::Tls);
        let webhook = rendered
            .split("location /webhook/")
            .nth(1)
            .and_then(|s| s.split('}').next())
            .unwrap();
        let general = rendered.rsplit("location /").next().unwrap();
        assert!(webhook.contains("proxy_read_timeout 120s;"));
        assert!(general.contains("proxy_read_timeout 300s;"));
    }

    #[test]
    fn test_redirect_excepts_challenge_path() {
        let rendered = render(&sample_config(), ProxyMode::Tls);
        let http_block = rendered.split("listen 443").next().unwrap();
        assert!(http_block.contains("/.well-known/acme-challenge/"));
        assert!(http_block.contains("return 301 https://$host$request_uri;"));
    }
}
