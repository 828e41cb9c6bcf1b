use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use member_export::SeedData;
use tracing::info;

use super::{field_cipher, print_json, read_json};
use crate::config::HoaConfig;

#[derive(Args, Debug, Clone)]
pub struct SealArgs {
    #[arg(long, value_name = "seed.json")]
    pub input: PathBuf,
    /// Defaults to stdout.
    #[arg(long, value_name = "sealed.json")]
    pub output: Option<PathBuf>,
}

pub fn run(args: SealArgs, config: &HoaConfig) -> Result<()> {
    let cipher = field_cipher(config)?;
    let mut seed: SeedData = read_json(&args.input)?;
    let sealed = seed
        .seal_members(&cipher)
        .context("failed to seal member fields")?;
    info!(sealed, members = seed.members.len(), "sealed member fields");

    match &args.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&seed)?;
            fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))
        }
        None => print_json(&seed),
    }
}
