mod assets;
mod config;
mod serve_cmd;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kismet_db::config::DbConfig;
use kismet_db::pool;

use config::{CliOverrides, KismetConfig, StoreKind};

#[derive(Parser)]
#[command(name = "kismet", about = "Control plane for self-hosted Kubernetes clusters")]
struct Cli {
    /// Database URL (overrides KISMET_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a kismet config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Record store backend for `serve`
        #[arg(long, value_enum, default_value_t = StoreKind::Postgres)]
        store: StoreKind,
        /// Root directory of per-cluster assets and logs
        #[arg(long)]
        assets_dir: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the kismet database if needed and apply migrations
    DbInit,
    /// Run the cluster API server
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
}

fn cmd_init(
    db_url: &str,
    store: StoreKind,
    assets_dir: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let assets_dir = assets_dir.unwrap_or_else(config::default_assets_dir);
    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        server: config::ServerSection {
            store,
            assets_dir: Some(assets_dir.clone()),
            ..Default::default()
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  server.store = {store}");
    println!("  server.assets_dir = {}", assets_dir.display());
    if store == StoreKind::Postgres {
        println!();
        println!("Next: run `kismet db-init` to create and migrate the database.");
    }

    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = KismetConfig::resolve(&CliOverrides {
        db_url: cli_db_url,
        ..Default::default()
    })?;

    println!("Initializing kismet database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let clusters = pool::cluster_count(&db_pool).await?;
    println!("Database ready. clusters: {clusters} rows");

    db_pool.close().await;

    println!("kismet db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            store,
            assets_dir,
            force,
        } => {
            cmd_init(&db_url, store, assets_dir, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = KismetConfig::resolve(&CliOverrides {
                db_url: cli.database_url.as_deref(),
                bind: bind.as_deref(),
                port,
            })?;
            serve_cmd::run_serve(&resolved).await?;
        }
    }

    Ok(())
}
