use std::path::{Path, PathBuf};

use sealyard_core::ResourceTable;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::estimator::DEFAULT_WINDOW;

/// Scheduler tuning, parsed from `sealyard.toml` with environment overrides.
///
/// ```toml
/// estimator_window = 10
/// forced_admission = true
/// resources = "/etc/sealyard/resources.toml"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Samples kept per (worker, task kind) by the estimator.
    #[serde(default = "default_window")]
    pub estimator_window: usize,

    /// Admit a task that does not fit when a single idle worker is all
    /// there is. Disabling this can leave oversized tasks queued forever.
    #[serde(default = "default_true")]
    pub forced_admission: bool,

    /// Optional TOML file with `[[profile]]` entries that override the
    /// built-in resource table.
    #[serde(default)]
    pub resources: Option<PathBuf>,
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            estimator_window: DEFAULT_WINDOW,
            forced_admission: true,
            resources: None,
        }
    }
}

impl SchedulerConfig {
    /// Parse from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: SchedulerConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Defaults plus environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let _ = dotenvy::dotenv();
        let mut config = SchedulerConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables:
    /// - `SEALYARD_ESTIMATOR_WINDOW`
    /// - `SEALYARD_FORCED_ADMISSION`
    /// - `SEALYARD_RESOURCES`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SEALYARD_ESTIMATOR_WINDOW") {
            if let Ok(window) = v.parse::<usize>() {
                self.estimator_window = window;
            }
        }
        if let Ok(v) = std::env::var("SEALYARD_FORCED_ADMISSION") {
            if let Ok(forced) = v.parse::<bool>() {
                self.forced_admission = forced;
            }
        }
        if let Ok(v) = std::env::var("SEALYARD_RESOURCES") {
            self.resources = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.estimator_window == 0 {
            return Err(SchedulerError::Config(
                "estimator_window must be at least 1".into(),
            ));
        }
        if let Some(path) = &self.resources {
            if path.as_os_str().is_empty() {
                return Err(SchedulerError::Config("resources path is empty".into()));
            }
        }
        Ok(())
    }

    /// Built-in table, with the override file merged over it if configured.
    pub fn resource_table(&self) -> Result<ResourceTable, SchedulerError> {
        let mut table = ResourceTable::builtin();
        if let Some(path) = &self.resources {
            let contents = std::fs::read_to_string(path)?;
            table.merge(ResourceTable::from_toml(&contents)?);
        }
        Ok(table)
    }
}
