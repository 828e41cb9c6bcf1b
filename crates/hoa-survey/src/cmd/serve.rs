use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use member_export::{AppState, MemoryStore, SeedData, router};
use tracing::{info, warn};

use super::{field_cipher, read_json, runtime};
use crate::config::HoaConfig;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on; overrides `[server].bind`.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
    /// Seed data file; overrides `[server].seed`.
    #[arg(long, value_name = "seed.json")]
    pub seed: Option<PathBuf>,
    /// Rows per fetch when the request does not say; overrides `[server].batch_size`.
    #[arg(long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,
}

pub fn run(args: ServeArgs, config: &HoaConfig) -> Result<()> {
    let Some(seed_path) = args.seed.or_else(|| config.server.seed.clone()) else {
        bail!("no seed file; pass --seed or set [server].seed");
    };
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let batch_size = args.batch_size.unwrap_or(config.server.batch_size);

    let seed: SeedData = read_json(&seed_path)?;
    let cipher = field_cipher(config)?;
    let store = MemoryStore::new(seed);
    let members = store.member_count();
    let state = AppState::new(Arc::new(store), Arc::new(cipher)).with_default_batch_size(batch_size);

    runtime()?.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        let addr = listener.local_addr()?;
        info!(%addr, members, batch_size, seed = %seed_path.display(), "export server listening");
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("export server failed")?;
        info!("export server stopped");
        anyhow::Ok(())
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
