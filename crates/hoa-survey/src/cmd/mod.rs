pub mod evaluate;
pub mod keygen;
pub mod pull;
pub mod seal;
pub mod serve;
pub mod tally;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use member_export::ChaChaFieldCipher;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use survey_logic::Question;

use crate::config::{FIELD_KEY_ENV, HoaConfig};

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// A survey file is either a bare question array or `{ "questions": [...] }`.
pub(crate) fn load_survey(path: &Path) -> Result<Vec<Question>> {
    let doc: Value = read_json(path)?;
    let questions = match doc {
        Value::Object(mut map) => map.remove("questions").unwrap_or(Value::Null),
        other => other,
    };
    if !questions.is_array() {
        bail!("{} does not contain a question array", path.display());
    }
    serde_json::from_value(questions)
        .with_context(|| format!("invalid questions in {}", path.display()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

pub(crate) fn field_cipher(config: &HoaConfig) -> Result<ChaChaFieldCipher> {
    let Some(key) = config.crypto.field_key.as_deref() else {
        bail!("no field key configured; set [crypto].field_key or {FIELD_KEY_ENV}");
    };
    ChaChaFieldCipher::from_base64(key).context("invalid field key")
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
