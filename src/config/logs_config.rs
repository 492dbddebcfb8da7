use anyhow::Context;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use tracing::Level;

#[derive(Deserialize, Debug, Clone)]
pub struct LogsConfig {
    #[serde(deserialize_with = "level_deserialize")]
    pub level: Level,
    #[serde(default, deserialize_with = "super::optional_path")]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub enable_file_logging: bool,
}

impl LogsConfig {
    /// Directory for log files, created when missing. `None` unless file
    /// logging is enabled.
    pub fn parse_dir(&self) -> anyhow::Result<Option<PathBuf>> {
        if !self.enable_file_logging {
            return Ok(None);
        }
        let path = self
            .storage_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("/var/log/fleetbeat"));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create logs directory. {:?}", path))?;
        Ok(Some(path.canonicalize().with_context(|| {
            format!("Failed to parse logs directory. {:?}", path)
        })?))
    }
}

fn level_deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(serde::de::Error::custom(format!(
            "Unsupported log level: {}",
            s
        ))),
    }
}
