//! Engine configuration.
//!
//! Loaded from TOML. Every section and field is optional except that a
//! store location (file path or in-memory) must be present by the time the
//! engine starts; `Engine::start` fails fast on a missing one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::hub::DEFAULT_HUB_BUFFER;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub hub: HubConfig,
    /// Legacy fallback source. Absent means no fallback: an unopenable
    /// store is a hard failure.
    #[serde(default)]
    pub legacy: Option<LegacyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Private in-memory database, for tests and ephemeral runs. Wins over
    /// `path` when both are set.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            create_if_missing: true,
            in_memory: false,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Rejected reviews a task may absorb before it requires manual
    /// intervention.
    #[serde(default = "default_max_rework")]
    pub max_rework: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_rework: default_max_rework(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    /// Broadcast channel capacity. Slow subscribers past this lag and
    /// resynchronize.
    #[serde(default = "default_hub_buffer")]
    pub buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer: default_hub_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyConfig {
    pub state_path: PathBuf,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_max_rework() -> u32 {
    3
}

fn default_hub_buffer() -> usize {
    DEFAULT_HUB_BUFFER
}

impl EngineConfig {
    /// Load and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Config for a private in-memory store.
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig {
                in_memory: true,
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }

    /// Config for a file-backed store with everything else defaulted.
    pub fn with_store_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                path: Some(path.into()),
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }
}
