//! Mount configuration
//!
//! Read from an optional TOML file and then overridden by command line
//! flags. Every field has a default, so an empty file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::text_fs::{TextFsOptions, DEFAULT_DIFF_PROGRAM, DEFAULT_MIRROR_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Write logs to this file instead of stderr
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
    /// Refresh closed tables from the database on access
    pub reload: bool,
    /// Allow mounting while running as root
    pub allow_root: bool,
    pub diff_program: String,
    pub mirror_prefix: String,
    /// Raw `-o` mount options
    pub mount_options: Vec<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            verbose: false,
            reload: true,
            allow_root: false,
            diff_program: DEFAULT_DIFF_PROGRAM.to_string(),
            mirror_prefix: DEFAULT_MIRROR_PREFIX.to_string(),
            mount_options: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl MountConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn text_fs_options(&self) -> TextFsOptions {
        TextFsOptions {
            reload: self.reload,
            diff_program: self.diff_program.clone(),
            mirror_prefix: self.mirror_prefix.clone(),
        }
    }
}
