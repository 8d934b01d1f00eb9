use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use enseada_auth::{AuthDeps, AuthModule, Context};
use enseada_couchdb::CouchDocumentStore;
use enseada_server::{load_config, observability};
use enseada_storage::DynDocumentStore;

#[derive(Parser)]
#[command(name = "enseada")]
#[command(about = "Enseada authorization core")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ENSEADA_CONFIG")]
    config: Option<PathBuf>,

    /// Create databases and indexes, then exit
    #[arg(long)]
    migrate_only: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    if cli.print_config {
        print!("{}", cfg.to_toml().context("failed to render configuration")?);
        return Ok(());
    }

    observability::init_tracing(&cfg.logging.level);
    tracing::info!(
        path = ?cli.config,
        couchdb = %cfg.couchdb.url,
        "configuration loaded"
    );

    let store: DynDocumentStore = Arc::new(
        CouchDocumentStore::new(&cfg.couchdb).context("failed to create CouchDB client")?,
    );

    let ctx = Context::background();
    let module = AuthModule::new(
        &ctx,
        AuthDeps {
            store,
            config: cfg.auth.clone(),
        },
    )
    .await
    .context("failed to initialise auth module")?;

    if cli.migrate_only {
        tracing::info!("migrations applied");
        return Ok(());
    }

    module
        .start(&ctx)
        .await
        .context("failed to start auth module")?;

    shutdown_signal().await;
    ctx.cancel();
    module.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
