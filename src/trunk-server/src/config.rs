// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for trunk-server.
//!
//! Config is loaded from the `[trunk-server]` section of `trunk-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./trunk-rs.toml`
//! 3. `~/.config/trunk-rs/trunk-rs.toml`
//! 4. `/etc/trunk-rs/trunk-rs.toml`

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trunk_app::ConfigFile;

use trunk_core::alias::{Alias, AliasId, AliasList, DEFAULT_PRIORITY, DO_NOT_MONITOR, MAX_PRIORITY};
use trunk_core::channel::machine::DEFAULT_CALL_TIMEOUT;

const BYTES_PER_MB: u64 = 1024 * 1024;

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("trunk-rs"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Call record store
    pub storage: StorageConfig,
    /// Call recordings
    pub calls: CallsConfig,
    /// Recording retention sweep
    pub retention: RetentionConfig,
    /// Duplicate call detection
    pub duplicate: DuplicateConfig,
    /// Traffic channel allocation
    pub traffic: TrafficConfig,
    pub monitor: MonitorConfig,
    /// JSON-lines ingest listener
    pub listen: ListenConfig,
    /// Aliases applied to every audio segment
    pub alias_list: AliasList,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    Pickledb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the pickledb backend
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Pickledb,
            path: default_data_dir().join("calls.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    /// Root directory for daily recording folders
    pub directory: PathBuf,
    /// Write WAV recordings for calls
    pub record: bool,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            directory: default_data_dir().join("calls"),
            record: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Age,
    Size,
    AgeAndSize,
}

impl RetentionPolicy {
    pub fn uses_age(self) -> bool {
        matches!(self, Self::Age | Self::AgeAndSize)
    }

    pub fn uses_size(self) -> bool {
        matches!(self, Self::Size | Self::AgeAndSize)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeUnits {
    Minutes,
    Hours,
    #[default]
    Days,
    Weeks,
    /// 30 days
    Months,
}

impl AgeUnits {
    fn seconds(self) -> u64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 60 * 60,
            Self::Days => 24 * 60 * 60,
            Self::Weeks => 7 * 24 * 60 * 60,
            Self::Months => 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    pub age_value: u64,
    pub age_units: AgeUnits,
    /// Target size of the calls directory in MiB
    pub objective_size_mb: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::Age,
            age_value: 30,
            age_units: AgeUnits::Days,
            objective_size_mb: 1024,
        }
    }
}

impl RetentionConfig {
    pub fn age(&self) -> Duration {
        Duration::from_secs(self.age_value.saturating_mul(self.age_units.seconds()))
    }

    pub fn objective_size_bytes(&self) -> u64 {
        self.objective_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub enabled: bool,
    /// Calls to the same talkgroup or patch group are duplicates
    pub by_talkgroup: bool,
    /// Calls from the same radio are duplicates
    pub by_radio: bool,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            by_talkgroup: true,
            by_radio: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Maximum number of pooled traffic channels
    pub pool_size: usize,
    /// Traffic channel fade timeout in milliseconds
    pub call_timeout_ms: u64,
    /// Traffic channels that can be followed at once
    pub tuner_channels: usize,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            tuner_channels: 4,
        }
    }
}

impl TrafficConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Grants for aliases at or below this priority are not followed
    pub do_not_monitor_priority: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            do_not_monitor_priority: DO_NOT_MONITOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Whether the ingest listener is enabled
    pub enabled: bool,
    /// IP address to listen on
    pub listen: IpAddr,
    /// Port to listen on
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 4540,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.storage.backend == StorageBackend::Pickledb
            && self.storage.path.as_os_str().is_empty()
        {
            return Err("[storage].path must be set for the pickledb backend".to_string());
        }
        if self.calls.directory.as_os_str().is_empty() {
            return Err("[calls].directory must be set".to_string());
        }

        if self.retention.policy.uses_age() && self.retention.age_value == 0 {
            return Err("[retention].age_value must be > 0".to_string());
        }
        if self.retention.policy.uses_size() && self.retention.objective_size_mb == 0 {
            return Err("[retention].objective_size_mb must be > 0".to_string());
        }

        if self.duplicate.enabled && !self.duplicate.by_talkgroup && !self.duplicate.by_radio {
            return Err(
                "[duplicate] enabled but both by_talkgroup and by_radio are false".to_string(),
            );
        }

        if self.traffic.pool_size == 0 {
            return Err("[traffic].pool_size must be > 0".to_string());
        }
        if self.traffic.call_timeout_ms == 0 {
            return Err("[traffic].call_timeout_ms must be > 0".to_string());
        }
        if self.traffic.tuner_channels == 0 {
            return Err("[traffic].tuner_channels must be > 0".to_string());
        }

        let priority = self.monitor.do_not_monitor_priority;
        if !(DO_NOT_MONITOR..=MAX_PRIORITY).contains(&priority) {
            return Err(format!(
                "[monitor].do_not_monitor_priority must be in range {}..={}",
                DO_NOT_MONITOR, MAX_PRIORITY
            ));
        }

        if self.listen.enabled && self.listen.port == 0 {
            return Err("[listen].port must be > 0 when listener is enabled".to_string());
        }

        validate_aliases(&self.alias_list)?;
        Ok(())
    }

    /// Generate an example configuration as a TOML string.
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }

    /// Generate an example combined `trunk-rs.toml` with a `[trunk-server]` table.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "trunk-server")]
            inner: ServerConfig,
        }
        toml::to_string_pretty(&Wrapper {
            inner: Self::example(),
        })
        .unwrap_or_default()
    }

    fn example() -> Self {
        let mut dispatch = Alias::new("Fire Dispatch", vec![AliasId::Talkgroup { value: 100 }]);
        dispatch.recordable = true;
        dispatch.playback_priority = 10;
        dispatch.broadcast_channels = vec!["scanner-feed".to_string()];

        let mut encrypted = Alias::new(
            "Tactical",
            vec![AliasId::TalkgroupRange { min: 900, max: 999 }],
        );
        encrypted.playback_priority = DO_NOT_MONITOR;

        Self {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            retention: RetentionConfig {
                policy: RetentionPolicy::AgeAndSize,
                ..RetentionConfig::default()
            },
            alias_list: AliasList::new("default", vec![dispatch, encrypted]),
            ..Self::default()
        }
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "trunk-server"
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_aliases(list: &AliasList) -> Result<(), String> {
    for alias in &list.aliases {
        if alias.name.trim().is_empty() {
            return Err("[alias_list].aliases entries must have a name".to_string());
        }
        let priority = alias.playback_priority;
        if priority != DO_NOT_MONITOR && !(1..=DEFAULT_PRIORITY).contains(&priority) {
            return Err(format!(
                "[alias_list] alias '{}' playback_priority {} is out of range",
                alias.name, priority
            ));
        }
        for id in &alias.ids {
            if let AliasId::TalkgroupRange { min, max } = id {
                if min > max {
                    return Err(format!(
                        "[alias_list] alias '{}' talkgroup range {}..{} is inverted",
                        alias.name, min, max
                    ));
                }
            }
        }
    }
    Ok(())
}
