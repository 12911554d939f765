// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! `trunk-rs.toml` discovery and section loading.
//!
//! One file carries a table per program (`[trunk-server]`, ...). A program
//! loads its own table and ignores the rest.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "trunk-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Candidate locations, most specific first: working directory, the user
/// config directory, then `/etc`.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("trunk-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/trunk-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Parse `key` out of the file at `path`. `Ok(None)` means the file is
/// valid TOML without that table.
fn read_section<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    let mut table: toml::Table =
        toml::from_str(&content).map_err(|e| parse_error(path, e))?;

    match table.remove(key) {
        None => Ok(None),
        Some(section) => section
            .try_into::<T>()
            .map(Some)
            .map_err(|e| parse_error(path, e)),
    }
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::ParseError(path.to_path_buf(), err.to_string())
}

/// A configuration struct stored as one table of `trunk-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Table name, e.g. `"trunk-server"`.
    fn section_key() -> &'static str;

    /// Load from an explicit file. A missing table is an error here.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        read_section::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Load from the first default location holding the table, or fall
    /// back to `Default` with no path.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        Self::load_from_candidates(&config_search_paths())
    }

    fn load_from_candidates(paths: &[PathBuf]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in paths.iter().filter(|p| p.exists()) {
            if let Some(cfg) = read_section::<Self>(path, Self::section_key())? {
                return Ok((cfg, Some(path.clone())));
            }
        }
        Ok((Self::default(), None))
    }
}
