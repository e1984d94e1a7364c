use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use dbhub::db::uri::redact;
use dbhub::db::{DbConfig, DEFAULT_CONNECTION};

#[derive(Parser)]
#[command(name = "dbhub", version, about = "Check database connectivity from a dbhub config")]
struct Cli {
    /// Path to the database config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, ping and close the default connection
    Check {
        /// Connect to this URI instead of the configured server
        #[arg(long)]
        uri: Option<String>,
    },
    /// Print the connection string built from the config
    Uri,
}

fn default_config_path() -> Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
    Ok(config_dir.join("dbhub").join("db.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    let config = DbConfig::from_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    let manager =
        dbhub::service::bootstrap(config).context("failed to start database service")?;
    let driver = manager.default_connector()?;

    match cli.command {
        Command::Uri => {
            println!("{}", redact(&driver.uri_for(None)?));
        }
        Command::Check { uri } => {
            let start = Instant::now();
            driver
                .create_connection(DEFAULT_CONNECTION, uri.as_deref())
                .await
                .context("failed to connect")?;
            let ping = driver.ping(None).await;
            let latency = start.elapsed().as_millis();

            for (key, report) in manager.close_all().await {
                for (name, error) in report.failures() {
                    warn!(connector = %key, connection = %name, error = %error, "Close failed");
                }
            }

            ping.context("ping failed")?;
            println!("{} OK ({} ms)", driver.engine(), latency);
        }
    }

    Ok(())
}
