use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use warden::settings::Settings;
use warden::{Params, PolicyEngine, Snapshot};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Role-based access control engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP decision API (default)
    Serve,
    /// Check whether a user may use an item
    Check {
        user_id: String,
        item: String,
        /// Condition parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Write the whole policy to a JSON snapshot
    Export { path: PathBuf },
    /// Replace the whole policy with a JSON snapshot
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // open the configured store (runs migrations for the database backend)
    let engine = PolicyEngine::from_settings(&settings).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => warden::web::serve(&settings, Arc::new(engine)).await?,
        Command::Check {
            user_id,
            item,
            params,
        } => {
            let params: Params = serde_json::from_str(&params).into_diagnostic()?;
            let allowed = engine.check_access(&user_id, &item, &params).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
        }
        Command::Export { path } => {
            let snapshot = engine.export_snapshot().await?;
            snapshot.write(&path)?;
            tracing::info!(path = %path.display(), items = snapshot.items.len(), "Exported policy");
        }
        Command::Import { path } => {
            let snapshot = Snapshot::read(&path)?;
            engine.import_snapshot(&snapshot).await?;
            engine.save().await?;
        }
    }
    Ok(())
}
