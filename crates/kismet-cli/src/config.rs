//! Configuration file management for kismet.
//!
//! Provides a TOML-based config file at `~/.config/kismet/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use kismet_db::config::DbConfig;

/// Env var overriding the per-cluster assets root.
pub const ASSETS_DIR_ENV: &str = "KISMET_ASSETS_DIR";
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub store: StoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,
}

/// Which record store backend `serve` uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Process-local; records are lost on exit.
    Memory,
    #[default]
    Postgres,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the kismet config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/kismet` or `~/.config/kismet`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("kismet");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("kismet")
}

/// Return the path to the kismet config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default root for per-cluster assets: `$XDG_DATA_HOME/kismet/clusters`
/// or `~/.local/share/kismet/clusters`.
pub fn default_assets_dir() -> PathBuf {
    let base = match std::env::var("XDG_DATA_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local")
            .join("share"),
    };
    base.join("kismet").join("clusters")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct KismetConfig {
    pub db_config: DbConfig,
    pub store: StoreKind,
    pub assets_dir: PathBuf,
    pub bind: String,
    pub port: u16,
}

/// Flags that take part in resolution.
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub db_url: Option<&'a str>,
    pub bind: Option<&'a str>,
    pub port: Option<u16>,
}

impl KismetConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `--database-url` > `KISMET_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Assets dir: `KISMET_ASSETS_DIR` > `server.assets_dir` > [`default_assets_dir`]
    /// - Bind / port: flag > `server.bind` / `server.port` > `127.0.0.1:8080`
    pub fn resolve(cli: &CliOverrides<'_>) -> Result<Self> {
        let file_config = load_config().ok();
        let server = file_config.as_ref().map(|c| &c.server);

        let db_url = if let Some(url) = cli.db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::URL_ENV) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let assets_dir = if let Ok(dir) = std::env::var(ASSETS_DIR_ENV) {
            PathBuf::from(dir)
        } else if let Some(dir) = server.and_then(|s| s.assets_dir.clone()) {
            dir
        } else {
            default_assets_dir()
        };

        let bind = cli
            .bind
            .map(str::to_string)
            .or_else(|| server.and_then(|s| s.bind.clone()))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let port = cli
            .port
            .or_else(|| server.and_then(|s| s.port))
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            db_config: DbConfig::new(db_url),
            store: server.map(|s| s.store).unwrap_or_default(),
            assets_dir,
            bind,
            port,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
