//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::PlaywrightConfig;
use crate::error::{HarnessError, HarnessResult};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "flowprobe.toml";

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Upper bound for one scenario, including its reset navigation
    pub scenario_timeout_ms: u64,

    /// Bound for a navigation to reach quiescence
    pub navigation_timeout_ms: u64,

    /// How long assertions keep polling before failing
    pub assert_timeout_ms: u64,

    /// Fixed delay used when the driver cannot detect network idle
    pub fallback_delay_ms: u64,

    /// How long to wait for an expected popup
    pub surface_timeout_ms: u64,

    /// Poll interval for assertions
    pub poll_interval_ms: u64,

    /// Groups run concurrently (1 = serial)
    pub jobs: usize,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Playwright driver settings
    pub playwright: PlaywrightConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scenario_timeout_ms: 60_000,
            navigation_timeout_ms: 60_000,
            assert_timeout_ms: 5_000,
            fallback_delay_ms: 1_000,
            surface_timeout_ms: 10_000,
            poll_interval_ms: 100,
            jobs: 1,
            output_dir: PathBuf::from("test-results"),
            playwright: PlaywrightConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Parse from TOML; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        debug!("Loading config from {}", path.display());
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Explicit file if given, else `flowprobe.toml` when present, else defaults.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.jobs == 0 {
            return Err(HarnessError::Config("jobs must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(HarnessError::Config("poll_interval_ms must be positive".into()));
        }
        if self.scenario_timeout_ms == 0 {
            return Err(HarnessError::Config("scenario_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn assert_timeout(&self) -> Duration {
        Duration::from_millis(self.assert_timeout_ms)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn surface_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
