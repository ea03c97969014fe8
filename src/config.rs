// logtrail - config.rs
//
// Pinned interface for the external configuration loader: the shape of a
// single tailed source's configuration. Reading a full application config
// file, merging CLI flags, and multi-source orchestration live outside this
// crate; this module only loads one TOML document into `SourceConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::util::constants::DEFAULT_MAX_HEAD_HASH_SIZE;
use crate::util::error::{CoreError, ConfigError};

/// Configuration for one tailed source, as an external loader would supply
/// it after resolving its own config file/CLI precedence.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Identifies the source in logs and on disk (`<base>/<name>/...`).
    pub name: String,

    /// Root directory under which this source's segments are written.
    pub base_path: PathBuf,

    /// Segment bucket period, e.g. 60 seconds.
    #[serde(with = "duration_secs")]
    pub period: Duration,

    /// Bytes hashed from the start of the tailed file to detect identity
    /// change across a restart. Zero disables head-hash verification.
    #[serde(default = "default_max_head_hash_size")]
    pub max_head_hash_size: u64,

    /// Either a literal path, or a cronolog template containing any of
    /// `%Y %y %m %d %H %M %S %N`.
    pub path_or_template: String,

    /// Slice period for a templated path; meaningless for a literal path.
    #[serde(with = "duration_secs")]
    pub rotate_period: Duration,

    /// Delay before attempting to reopen the file after a rotation.
    #[serde(with = "duration_secs")]
    pub reopen_delay: Duration,

    /// Use the stat-polling watcher instead of the event-driven one.
    #[serde(default)]
    pub poll_mode: bool,
}

fn default_max_head_hash_size() -> u64 {
    DEFAULT_MAX_HEAD_HASH_SIZE
}

/// Deserialize `Duration` fields from a plain number of seconds, since TOML
/// has no native duration type.
mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Load and validate one source's configuration from a TOML document.
pub fn load_source_config(path: &Path) -> Result<SourceConfig, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        CoreError::Config(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    })?;

    let config: SourceConfig = toml::from_str(&text).map_err(|source| {
        CoreError::Config(ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    })?;

    if config.name.trim().is_empty() {
        return Err(CoreError::Config(ConfigError::ValueOutOfRange {
            field: "name".to_string(),
            value: config.name.clone(),
            expected: "a non-empty source name".to_string(),
        }));
    }
    if config.period.is_zero() {
        return Err(CoreError::Config(ConfigError::ValueOutOfRange {
            field: "period".to_string(),
            value: "0".to_string(),
            expected: "a positive number of seconds".to_string(),
        }));
    }

    Ok(config)
}
