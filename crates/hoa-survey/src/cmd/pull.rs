use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use export_client::{CollectionKind, FileCache, HttpTransport, IdleTimer, StreamConsumer};
use serde_json::Value;
use tracing::info;

use super::runtime;
use crate::config::HoaConfig;

#[derive(Args, Debug, Clone)]
pub struct PullArgs {
    /// `members` or `nonrespondents`.
    #[arg(long, value_name = "KIND")]
    pub kind: CollectionKind,
    /// Member list id for members, survey id for nonrespondents.
    #[arg(long, value_name = "ID")]
    pub id: String,
    /// Overrides `[client].base_url`.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,
    /// Drop any cached records before pulling.
    #[arg(long)]
    pub fresh: bool,
    /// Only print records whose lot, name or address contains this text.
    #[arg(long, value_name = "TEXT")]
    pub filter: Option<String>,
    /// Give up once no record has arrived for this many seconds.
    #[arg(long = "idle-timeout", value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

pub fn run(args: PullArgs, config: &HoaConfig) -> Result<()> {
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.client.base_url.clone());
    let transport = HttpTransport::new(&base_url)
        .with_context(|| format!("invalid base url {base_url}"))?;
    let cache = FileCache::new(config.cache_dir()).with_ttl(config.client.cache_ttl());
    let consumer = StreamConsumer::new(
        args.kind,
        args.id.clone(),
        Arc::new(transport),
        Arc::new(cache),
    );

    let records = runtime()?.block_on(async {
        if args.fresh {
            consumer.clear_cache().await?;
        }
        let all = match args.idle_timeout {
            Some(secs) => {
                let idle = IdleTimer::new(Duration::from_secs(secs));
                consumer.run_to_end_within(idle).await?
            }
            None => consumer.run_to_end().await?,
        };
        let shown = match args.filter.as_deref() {
            Some(query) => consumer.filtered(query).await,
            None => all.clone(),
        };
        info!(
            kind = args.kind.as_str(),
            id = %args.id,
            received = all.len(),
            shown = shown.len(),
            "export pulled"
        );
        anyhow::Ok(shown)
    })?;
    write_ndjson(&records)
}

fn write_ndjson(records: &[Value]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for record in records {
        serde_json::to_writer(&mut stdout, record)?;
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}
