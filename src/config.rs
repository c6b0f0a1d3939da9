//! Deployment configuration.
//!
//! Configuration lives in a flat key=value `.env` file, shared with the
//! compose file's variable interpolation. It is loaded once per invocation
//! into an immutable [`DeployConfig`] and passed by reference to each phase;
//! reconfiguration rewrites the whole file, never patches it in place.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;

/// Keys this tool owns. Anything else in the file is preserved verbatim
/// across rewrites (operators add n8n tuning knobs there).
const KNOWN_KEYS: &[&str] = &[
    "DOMAIN",
    "SSL_EMAIL",
    "N8N_PROTOCOL",
    "N8N_SECURE_COOKIE",
    "WEBHOOK_URL",
    "GENERIC_TIMEZONE",
];

/// Public protocol the deployment is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => bail!("N8N_PROTOCOL must be 'http' or 'https', got '{}'", other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment configuration, loaded once per invocation.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Fully qualified name the deployment is reachable under.
    pub domain: String,
    /// Contact address registered with the certificate authority.
    pub email: String,
    pub protocol: Protocol,
    pub secure_cookie: bool,
    /// Base URL n8n advertises for webhooks; derived when not set.
    pub webhook_url: String,
    pub timezone: String,
    /// Unrecognized keys, preserved in order for rewrites.
    pub extra: Vec<(String, String)>,
}

impl DeployConfig {
    /// Load and parse the `.env` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "configuration file not found: {}\nRun 'n8nctl init' to create a starter deployment",
                path.display()
            );
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse `.env`-style content.
    pub fn parse(content: &str) -> Result<Self> {
        let entries = parse_env(content);

        let get = |key: &str| -> String {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let domain = get("DOMAIN");
        let email = get("SSL_EMAIL");
        let protocol = Protocol::parse(&get("N8N_PROTOCOL"))?;
        let secure_cookie = match get("N8N_SECURE_COOKIE").trim().to_ascii_lowercase().as_str() {
            "" => protocol == Protocol::Https,
            "true" | "1" => true,
            "false" | "0" => false,
            other => bail!("N8N_SECURE_COOKIE must be true or false, got '{}'", other),
        };
        let webhook_url = {
            let raw = get("WEBHOOK_URL");
            if raw.is_empty() && !domain.is_empty() {
                format!("{}://{}/", protocol, domain)
            } else {
                raw
            }
        };
        let timezone = {
            let raw = get("GENERIC_TIMEZONE");
            if raw.is_empty() {
                "UTC".to_string()
            } else {
                raw
            }
        };

        let extra = entries
            .into_iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .collect();

        Ok(Self {
            domain,
            email,
            protocol,
            secure_cookie,
            webhook_url,
            timezone,
            extra,
        })
    }

    /// Validate the values every certificate operation depends on.
    ///
    /// Called by each mutating phase before any external command runs.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            bail!(
                "DOMAIN is not set\nEdit .env and set DOMAIN to the name pointing at this host"
            );
        }
        if self.domain.contains("://") || self.domain.contains('/') {
            bail!(
                "DOMAIN must be a bare host name, got '{}'\nDrop the scheme and path from the value",
                self.domain
            );
        }
        if !self.domain.contains('.') {
            bail!(
                "DOMAIN '{}' is not a fully qualified name\nCertificates cannot be issued for bare labels",
                self.domain
            );
        }
        if self.email.trim().is_empty() {
            bail!(
                "SSL_EMAIL is not set\nEdit .env and set SSL_EMAIL to the certificate contact address"
            );
        }
        if !is_well_formed_email(&self.email) {
            bail!("SSL_EMAIL '{}' is not a valid email address", self.email);
        }
        Ok(())
    }

    /// Copy of this configuration flipped to another protocol, with the
    /// dependent values (cookie flag, webhook base) recomputed.
    pub fn with_protocol(&self, protocol: Protocol) -> Self {
        let mut updated = self.clone();
        updated.protocol = protocol;
        updated.secure_cookie = protocol == Protocol::Https;
        updated.webhook_url = format!("{}://{}/", protocol, self.domain);
        updated
    }

    /// Render the whole file. Used for every write; there is no in-place
    /// editing of the configuration.
    pub fn render(&self) -> String {
        let mut out = String::from("# n8n deployment configuration (rewritten wholesale by n8nctl)\n");
        out.push_str(&format!("DOMAIN={}\n", self.domain));
        out.push_str(&format!("SSL_EMAIL={}\n", self.email));
        out.push_str(&format!("N8N_PROTOCOL={}\n", self.protocol));
        out.push_str(&format!("N8N_SECURE_COOKIE={}\n", self.secure_cookie));
        out.push_str(&format!("WEBHOOK_URL={}\n", self.webhook_url));
        out.push_str(&format!("GENERIC_TIMEZONE={}\n", self.timezone));
        for (key, value) in &self.extra {
            out.push_str(&format!("{}={}\n", key, value));
        }
        out
    }

    /// Write the configuration file.
    pub fn store(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Starter `.env` content for `init`. Left invalid on purpose: the
/// validation gate refuses to act until DOMAIN and SSL_EMAIL are filled in.
pub fn starter_env() -> &'static str {
    "\
# n8n deployment configuration
# Fill in DOMAIN and SSL_EMAIL, then run 'n8nctl deploy'.
DOMAIN=
SSL_EMAIL=
N8N_PROTOCOL=http
N8N_SECURE_COOKIE=false
WEBHOOK_URL=
GENERIC_TIMEZONE=UTC
"
}

/// Parse flat key=value lines, skipping blanks and comments. Values may be
/// single- or double-quoted.
pub fn parse_env(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Structural email check: local part, host with a dot. Matches the grade
/// of validation certbot itself applies before talking to the CA.
pub fn is_well_formed_email(address: &str) -> bool {
    let Some((local, host)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !host.is_empty()
        && host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# comment
DOMAIN=example.com
SSL_EMAIL=ops@example.com
N8N_PROTOCOL=http
N8N_SECURE_COOKIE=false
GENERIC_TIMEZONE=Europe/Berlin
N8N_ENCRYPTION_KEY=abc123
";

    #[test]
    fn test_parse_sample() {
        let config = DeployConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.email, "ops@example.com");
        assert_eq!(config.protocol, Protocol::Http);
        assert!(!config.secure_cookie);
        assert_eq!(config.timezone, "Europe/Berlin");
        // Derived when absent.
        assert_eq!(config.webhook_url, "http://example.com/");
        // Unknown keys survive the parse.
        assert_eq!(
            config.extra,
            vec![("N8N_ENCRYPTION_KEY".to_string(), "abc123".to_string())]
        );
    }

    #[test]
    fn test_parse_quoted_values() {
        let entries = parse_env("A=\"quoted\"\nB='single'\nC=bare\n");
        assert_eq!(entries[0].1, "quoted");
        assert_eq!(entries[1].1, "single");
        assert_eq!(entries[2].1, "bare");
    }

    #[test]
    fn test_validate_rejects_empty_domain() {
        let config = DeployConfig::parse("DOMAIN=\nSSL_EMAIL=ops@example.com\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_email() {
        let config = DeployConfig::parse("DOMAIN=example.com\nSSL_EMAIL=\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_url_shaped_domain() {
        let config =
            DeployConfig::parse("DOMAIN=https://example.com\nSSL_EMAIL=ops@example.com\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_sample() {
        let config = DeployConfig::parse(SAMPLE).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_well_formed_email("ops@example.com"));
        assert!(!is_well_formed_email("ops"));
        assert!(!is_well_formed_email("@example.com"));
        assert!(!is_well_formed_email("ops@"));
        assert!(!is_well_formed_email("ops@localhost"));
        assert!(!is_well_formed_email("ops@.com"));
    }

    #[test]
    fn test_with_protocol_recomputes_dependents() {
        let config = DeployConfig::parse(SAMPLE).unwrap();
        let https = config.with_protocol(Protocol::Https);
        assert_eq!(https.protocol, Protocol::Https);
        assert!(https.secure_cookie);
        assert_eq!(https.webhook_url, "https://example.com/");
        // The original is untouched.
        assert_eq!(config.protocol, Protocol::Http);
    }

    #[test]
    fn test_render_roundtrip_preserves_extras() {
        let config = DeployConfig::parse(SAMPLE).unwrap();
        let rendered = config.render();
        let reparsed = DeployConfig::parse(&rendered).unwrap();
        assert_eq!(reparsed.domain, config.domain);
        assert_eq!(reparsed.extra, config.extra);
    }

    #[test]
    fn test_starter_env_fails_validation_until_filled() {
        let config = DeployConfig::parse(starter_env()).unwrap();
        assert!(config.validate().is_err());
    }
}
