use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cmd::{
    self, evaluate::EvaluateArgs, pull::PullArgs, seal::SealArgs, serve::ServeArgs,
    tally::TallyArgs,
};
use crate::config::{HoaConfig, LogFormat};
use crate::logging;

#[derive(Parser, Debug)]
#[command(
    name = "hoa-survey",
    about = "HOA survey evaluation, tallying and member exports",
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, value_name = "PATH", global = true, env = "HOA_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `member_export=debug`
    #[arg(long = "log-level", value_name = "FILTER", global = true)]
    log_level: Option<String>,

    #[arg(long = "log-format", value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Base64 field key used to seal and open member PII
    #[arg(
        long = "field-key",
        value_name = "KEY",
        global = true,
        env = "HOA_FIELD_KEY",
        hide_env_values = true
    )]
    field_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve member and nonrespondent exports over HTTP
    Serve(ServeArgs),
    /// Evaluate question visibility and reconcile one set of answers
    Evaluate(EvaluateArgs),
    /// Tally responses per question
    Tally(TallyArgs),
    /// Encrypt member PII fields in a seed file
    Seal(SealArgs),
    /// Print a new random field key
    Keygen,
    /// Pull an export to completion and print it as ndjson
    Pull(PullArgs),
}

impl Cli {
    /// Flags and environment take precedence over the config file.
    fn apply_overrides(&self, config: &mut HoaConfig) {
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(key) = &self.field_key {
            config.crypto.field_key = Some(key.clone());
        }
    }
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = HoaConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    logging::init(&config.log.level, config.log.format)?;

    match cli.command {
        Commands::Serve(args) => cmd::serve::run(args, &config),
        Commands::Evaluate(args) => cmd::evaluate::run(args),
        Commands::Tally(args) => cmd::tally::run(args),
        Commands::Seal(args) => cmd::seal::run(args, &config),
        Commands::Keygen => cmd::keygen::run(),
        Commands::Pull(args) => cmd::pull::run(args, &config),
    }
}
