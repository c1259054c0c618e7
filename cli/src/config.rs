//! TOML configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use livekey_ipc::BootstrapConfig;

/// Log filter used when neither `RUST_LOG` nor the file sets one.
pub const DEFAULT_LOG_FILTER: &str =
    "livekey=info,livekey_engine=info,livekey_capture=info,livekey_host=info";

/// Files tried, relative to the working directory, when `--config` is absent.
pub const CONFIG_CANDIDATES: [&str; 2] = ["livekey.toml", "config/livekey.toml"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Application configuration.
///
/// The bootstrap sections (`[capture]`, `[paths]`, `[timing]`, `[targets]`)
/// live at the top level next to `[logging]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,

    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    /// Load `explicit`, or the first candidate file under `base`, or defaults.
    ///
    /// Returns the file that was read, if any.
    pub fn load(explicit: Option<&Path>, base: &Path) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            if !path.is_file() {
                bail!("config file {} not found", path.display());
            }
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in CONFIG_CANDIDATES {
            let path = base.join(candidate);
            if path.is_file() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
