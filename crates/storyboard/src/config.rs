use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{app_data_dir, default_download_dir};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read or write config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid json")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{var}={value:?} is not a valid value")]
    InvalidEnv { var: &'static str, value: String },
    #[error("display_scale must be a positive number, got {0}")]
    InvalidScale(f32),
}

/// Editor settings, read from `config.json` in the app data dir and then
/// overridden by `NEMU_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub api_base_url: String,
    pub regenerate_path: String,
    pub display_scale: f32,
    pub model_path: Option<PathBuf>,
    /// RGBA fill for masked pixels in the segmentation overlay.
    pub mask_color: [u8; 4],
    pub download_dir: Option<PathBuf>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            regenerate_path: "/api/regenerate-panel".to_string(),
            display_scale: 0.5,
            model_path: None,
            mask_color: [0, 114, 255, 140],
            download_dir: None,
        }
    }
}

impl EditorConfig {
    pub fn config_path() -> PathBuf {
        app_data_dir().join("config.json")
    }

    /// Defaults, then the config file if present, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())?.apply_env(|var| std::env::var(var).ok())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check()?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    /// Apply `NEMU_API_URL`, `NEMU_DISPLAY_SCALE`, `NEMU_MODEL_PATH` and
    /// `NEMU_DOWNLOAD_DIR` through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("NEMU_API_URL") {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = get("NEMU_DISPLAY_SCALE") {
            self.display_scale = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NEMU_DISPLAY_SCALE",
                value: raw.clone(),
            })?;
        }
        if let Some(path) = get("NEMU_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("NEMU_DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(path));
        }
        self.check()?;
        Ok(self)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !self.display_scale.is_finite() || self.display_scale <= 0.0 {
            return Err(ConfigError::InvalidScale(self.display_scale));
        }
        Ok(())
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_display_scale(mut self, scale: f32) -> Self {
        self.display_scale = scale;
        self
    }

    pub fn regenerate_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let path = self.regenerate_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(default_download_dir)
    }
}
