//! Per-cluster files written by the reconciler.
//!
//! Layout under the assets root:
//!
//! ```text
//! <root>/<cluster>/kismet.log
//! <root>/<cluster>/assets/kubeconfig
//! <root>/<cluster>/assets/...
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;

pub const LOG_FILE: &str = "kismet.log";
pub const ASSETS_SUBDIR: &str = "assets";
pub const KUBECONFIG_FILE: &str = "kubeconfig";

#[derive(Debug, Clone)]
pub struct ClusterAssets {
    root: PathBuf,
}

impl ClusterAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding everything for `name`.
    ///
    /// Names that would escape the root (separators, `.`, `..`) are refused.
    pub fn cluster_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            bail!("cluster name {name:?} cannot be used as an assets path");
        }
        Ok(self.root.join(name))
    }

    pub fn log_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.cluster_dir(name)?.join(LOG_FILE))
    }

    pub fn assets_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.cluster_dir(name)?.join(ASSETS_SUBDIR))
    }

    pub fn kubeconfig_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.assets_dir(name)?.join(KUBECONFIG_FILE))
    }

    pub async fn read_kubeconfig(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.kubeconfig_path(name)?;
        read_regular_file(&path)
            .await
            .with_context(|| format!("kubeconfig for cluster {name} could not be retrieved"))
    }

    pub async fn read_log(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.log_path(name)?;
        read_regular_file(&path)
            .await
            .with_context(|| format!("logs for cluster {name} could not be retrieved"))
    }

    /// Gzipped tarball of the cluster's assets directory. Entries are rooted
    /// at `assets/`.
    pub async fn archive(&self, name: &str) -> Result<Vec<u8>> {
        let dir = self.assets_dir(name)?;
        let meta = tokio::fs::metadata(&dir)
            .await
            .with_context(|| format!("assets for cluster {name} could not be retrieved"))?;
        if !meta.is_dir() {
            bail!(
                "assets for cluster {name} could not be retrieved: {} is not a directory",
                dir.display()
            );
        }

        tokio::task::spawn_blocking(move || tar_gz(&dir))
            .await
            .context("archive task panicked")?
            .with_context(|| format!("could not archive the assets for cluster {name}"))
    }
}

async fn read_regular_file(path: &Path) -> Result<Vec<u8>> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if meta.is_dir() {
        bail!("{} is a directory", path.display());
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn tar_gz(source: &Path) -> std::io::Result<Vec<u8>> {
    let mut gzipper = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut archive = tar::Builder::new(&mut gzipper);
        archive.append_dir_all(ASSETS_SUBDIR, source)?;
        archive.finish()?;
    }
    gzipper.flush()?;
    gzipper.finish()
}
