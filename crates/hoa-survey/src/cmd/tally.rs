use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use survey_logic::{AnswerSet, tally};

use super::{load_survey, print_json};

#[derive(Args, Debug, Clone)]
pub struct TallyArgs {
    #[arg(long, value_name = "survey.json")]
    pub survey: PathBuf,
    /// JSON array of answer objects, or one answer object per line.
    #[arg(long, value_name = "responses.json")]
    pub responses: PathBuf,
}

pub fn run(args: TallyArgs) -> Result<()> {
    let questions = load_survey(&args.survey)?;
    let responses = load_responses(&args.responses)?;
    print_json(&tally(&questions, &responses))
}

fn load_responses(path: &Path) -> Result<Vec<AnswerSet>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_responses(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_responses(raw: &str) -> Result<Vec<AnswerSet>> {
    if raw.trim_start().starts_with('[') {
        let docs: Vec<Value> = serde_json::from_str(raw)?;
        return Ok(docs.iter().map(AnswerSet::from_json).collect());
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let doc: Value = serde_json::from_str(line)
                .with_context(|| format!("line {} is not JSON", idx + 1))?;
            Ok(AnswerSet::from_json(&doc))
        })
        .collect()
}
