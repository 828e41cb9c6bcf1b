use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const FIELD_KEY_ENV: &str = "HOA_FIELD_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HoaConfig {
    pub server: ServerConfig,
    pub crypto: CryptoConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub batch_size: usize,
    pub seed: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            batch_size: member_export::DEFAULT_BATCH_SIZE,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoConfig {
    /// Base64 of the 32-byte field key.
    pub field_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".into(),
            cache_dir: None,
            cache_ttl_secs: export_client::DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl ClientConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "hoa", "hoa-survey")
}

impl HoaConfig {
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `path`, or the default location when `None`. A missing default
    /// file yields defaults; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            if explicit {
                bail!("config file {} does not exist", path.display());
            }
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.client.cache_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|dirs| dirs.cache_dir().join("exports"))
            .unwrap_or_else(|| std::env::temp_dir().join("hoa-survey").join("exports"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = HoaConfig::parse("").expect("parse");
        assert_eq!(config, HoaConfig::default());
        assert_eq!(config.server.batch_size, 100);
        assert_eq!(config.client.cache_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn sections_override_defaults() {
        let config = HoaConfig::parse(
            r#"
            [server]
            bind = "0.0.0.0:9000"
            batch_size = 500
            seed = "seed.json"

            [crypto]
            field_key = "AAAA"

            [client]
            cache_dir = "/tmp/hoa-cache"
            cache_ttl_secs = 60

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .expect("parse");
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.seed.as_deref(), Some(Path::new("seed.json")));
        assert_eq!(config.crypto.field_key.as_deref(), Some("AAAA"));
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/hoa-cache"));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(HoaConfig::parse("[server]\nport = 1").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HoaConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\n").unwrap();
        let err = HoaConfig::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
