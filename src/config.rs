/// Layered configuration for the resilience layer
///
/// Sources, lowest precedence first:
/// 1. Built-in defaults
/// 2. TOML file (explicit path, or `resilience.toml` in the platform config dir)
/// 3. Environment variables, e.g. `COURSE_RESILIENCE__RETRY__MAX_ATTEMPTS=5`
use crate::error::recovery_coordinator::DEFAULT_RETAINED_FAILURES;
use crate::error::reporting::DEFAULT_BREADCRUMB_CAPACITY;
use crate::error::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "COURSE_RESILIENCE";
pub const CONFIG_FILE_NAME: &str = "resilience.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    pub recovery: RecoverySettings,
    pub boundary: BoundarySettings,
    pub reporting: ReportingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Failed keys kept available to `retry`
    pub retained_failures: usize,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            retained_failures: DEFAULT_RETAINED_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySettings {
    pub auto_reset_ms: u64,

    /// Faults tolerated before auto-reset is suppressed
    pub max_faults: u32,

    pub fault_window_ms: Option<u64>,
    pub show_details: bool,
}

impl Default for BoundarySettings {
    fn default() -> Self {
        Self {
            auto_reset_ms: 30_000,
            max_faults: 3,
            fault_window_ms: None,
            show_details: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingSettings {
    pub breadcrumb_capacity: usize,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            breadcrumb_capacity: DEFAULT_BREADCRUMB_CAPACITY,
        }
    }
}

impl ResilienceConfig {
    /// Load from defaults, an optional file and the environment
    ///
    /// With no explicit path the platform config file is used if it exists.
    /// An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read resilience configuration")?;

        let loaded: ResilienceConfig = settings
            .try_deserialize()
            .context("Invalid resilience configuration")?;
        loaded.validate()?;

        tracing::debug!(config = ?loaded, "Resilience configuration loaded");
        Ok(loaded)
    }

    /// `resilience.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "course-platform", "course-resilience")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate().context("Invalid [retry] section")?;
        if self.boundary.max_faults == 0 {
            anyhow::bail!("boundary.max_faults must be at least 1");
        }
        Ok(())
    }
}
