use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};
use thiserror::Error;

use parley_types::ApprovalMode;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

// Default value functions for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

const fn default_summary_max_chars() -> usize {
    60
}

#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfig {
    pub app: Option<AppConfig>,
    pub telemetry: Option<TelemetryConfig>,
    pub summary: Option<SummaryConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Model used when the backend handshake does not name one.
    pub model: Option<String>,
    #[serde(default)]
    pub approval_mode: Option<ApprovalMode>,
}

#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Derived titles are cut to this many characters.
    #[serde(default = "default_summary_max_chars")]
    pub max_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chars: default_summary_max_chars(),
        }
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            // `${}` and unclosed references are kept as written.
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    out
}

impl ParleyConfig {
    /// Load from [`config_path`]. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str::<ParleyConfig>(&content) {
            Ok(mut config) => {
                config.expand_env();
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    fn expand_env(&mut self) {
        if let Some(model) = self.app.as_mut().and_then(|app| app.model.as_mut()) {
            *model = expand_env_vars(model);
        }
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.app
            .as_ref()
            .and_then(|app| app.model.as_deref())
            .filter(|model| !model.is_empty())
    }

    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        self.app
            .as_ref()
            .and_then(|app| app.approval_mode)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry.as_ref().is_none_or(|t| t.enabled)
    }

    #[must_use]
    pub fn summary(&self) -> SummaryConfig {
        self.summary.clone().unwrap_or_default()
    }
}

/// `$PARLEY_CONFIG` if set, else `~/.parley/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".parley").join("config.toml"))
}
