//! Backup export.
//!
//! Copies everything needed to rebuild the deployment elsewhere: a snapshot
//! of the n8n data volume (taken through an ephemeral helper container),
//! the proxy configuration, the environment file, the orchestration
//! definition and the certificate material, plus a manifest. The manifest
//! is written last and doubles as the completion marker: a bundle without
//! one is incomplete.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::info;

use crate::compose::ComposeCtl;
use crate::config::DeployConfig;
use crate::paths::DeployPaths;
use crate::process::Cmd;

/// Bundle metadata, recorded at export time.
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: String,
    pub domain: String,
    pub protocol: String,
    pub docker_version: Option<String>,
    pub compose_version: Option<String>,
    /// Container status listing at backup time.
    pub containers: String,
}

pub const MANIFEST_FILE: &str = "manifest.json";

/// Exports backup bundles for one deployment.
pub struct BackupExporter<'a> {
    paths: &'a DeployPaths,
    config: &'a DeployConfig,
    compose: &'a ComposeCtl,
}

impl<'a> BackupExporter<'a> {
    pub fn new(paths: &'a DeployPaths, config: &'a DeployConfig, compose: &'a ComposeCtl) -> Self {
        Self {
            paths,
            config,
            compose,
        }
    }

    /// Export a bundle. Any failing step aborts the run, leaving a bundle
    /// without a manifest.
    pub fn export(&self, name: Option<&str>, compress: bool) -> Result<PathBuf> {
        self.config.validate()?;

        let stamp = default_name()?;
        let bundle_name = name.unwrap_or(&stamp);
        let dest = self.paths.backups_dir.join(bundle_name);
        if dest.exists() {
            bail!(
                "backup destination already exists: {}\nBundles are immutable; pick another name",
                dest.display()
            );
        }
        fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;

        println!("Exporting backup to {}", dest.display());

        self.snapshot_volume(&dest)
            .context("data volume snapshot failed")?;

        let nginx_dir = self.paths.base_dir.join("nginx");
        if nginx_dir.exists() {
            copy_tree(&nginx_dir, &dest.join("nginx"))?;
            println!("[ OK ] proxy configuration copied");
        }
        fs::copy(&self.paths.env_file, dest.join(".env"))
            .with_context(|| format!("failed to copy {}", self.paths.env_file.display()))?;
        fs::copy(&self.paths.compose_file, dest.join("docker-compose.yml"))
            .with_context(|| format!("failed to copy {}", self.paths.compose_file.display()))?;
        println!("[ OK ] configuration files copied");

        if self.paths.certbot_conf.exists() {
            copy_tree(&self.paths.certbot_conf, &dest.join("certbot/conf"))?;
            println!("[ OK ] certificate material copied");
        } else {
            println!("[SKIP] no certificate material yet");
        }

        let manifest = self.build_manifest()?;
        let manifest_json =
            serde_json::to_string_pretty(&manifest).context("failed to encode the manifest")?;
        fs::write(dest.join(MANIFEST_FILE), manifest_json)
            .with_context(|| format!("failed to write the manifest in {}", dest.display()))?;
        println!("[ OK ] manifest written");

        if compress {
            let archive = self.compress(&dest, bundle_name)?;
            println!("[ OK ] bundle compressed to {}", archive.display());
            return Ok(archive);
        }

        Ok(dest)
    }

    /// Snapshot the data volume through an ephemeral helper container; the
    /// running n8n container is not touched.
    fn snapshot_volume(&self, dest: &Path) -> Result<()> {
        let volume = self.compose.data_volume();
        let dest_abs = fs::canonicalize(dest)
            .with_context(|| format!("failed to resolve {}", dest.display()))?;

        info!(volume, "snapshotting data volume");
        Cmd::new("docker")
            .args(["run", "--rm"])
            .arg("-v")
            .arg(format!("{}:/source:ro", volume))
            .arg("-v")
            .arg(format!("{}:/backup", dest_abs.display()))
            .args(["alpine", "tar", "czf", "/backup/n8n-data.tar.gz", "-C", "/source", "."])
            .error_msg(format!(
                "failed to snapshot the {} volume (is the stack deployed?)",
                volume
            ))
            .run()?;
        println!("[ OK ] data volume snapshot taken");
        Ok(())
    }

    fn build_manifest(&self) -> Result<Manifest> {
        let docker_version = Cmd::new("docker")
            .arg("--version")
            .allow_fail()
            .run()
            .ok()
            .filter(|r| r.success())
            .map(|r| r.stdout.trim().to_string());

        Ok(Manifest {
            created_at: OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .context("failed to format the timestamp")?,
            domain: self.config.domain.clone(),
            protocol: self.config.protocol.to_string(),
            docker_version,
            compose_version: self.compose.version(),
            containers: self.compose.ps().unwrap_or_default(),
        })
    }

    /// Compress the bundle into a single archive and discard the directory.
    fn compress(&self, dest: &Path, bundle_name: &str) -> Result<PathBuf> {
        let archive = self.paths.backups_dir.join(format!("{}.tar.gz", bundle_name));
        Cmd::new("tar")
            .arg("czf")
            .arg_path(&archive)
            .arg("-C")
            .arg_path(&self.paths.backups_dir)
            .arg(bundle_name)
            .error_msg("failed to compress the bundle")
            .run()?;
        fs::remove_dir_all(dest)
            .with_context(|| format!("failed to remove {}", dest.display()))?;
        Ok(archive)
    }
}

/// Default bundle name: a UTC stamp.
fn default_name() -> Result<String> {
    let format = format_description!("[year][month][day]-[hour][minute][second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .context("failed to format the backup stamp")
}

/// Copy a directory tree recursively, following the certbot layout's
/// symlinks by copying their targets' content.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_tree(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("failed to copy {}", src_path.display()))?;
        }
    }
    Ok(())
}
