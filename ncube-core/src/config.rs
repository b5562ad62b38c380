//! Engine configuration loader
//!
//! Loads engine limits from a YAML file. Every field is optional; missing
//! fields keep their defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "NCUBE_CONFIG";
const DEFAULT_FILE: &str = "ncube.yaml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum nesting of program cells calling other cubes.
    pub max_call_depth: usize,
    /// Reject re-entry of an identical (cube, coordinate) frame.
    pub detect_cycles: bool,
    /// Honor the cacheable flag on program cells.
    pub cache_program_results: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            detect_cycles: true,
            cache_program_results: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(anyhow!("max_call_depth must be at least 1"));
        }
        Ok(())
    }
}

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Loader that always yields defaults.
    pub fn defaults() -> Self {
        Self { path: None }
    }

    /// Resolve the config file.
    ///
    /// Path resolution order:
    /// 1. NCUBE_CONFIG environment variable
    /// 2. ./ncube.yaml when present
    /// 3. built-in defaults
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::new(path);
        }
        if Path::new(DEFAULT_FILE).exists() {
            return Self::new(DEFAULT_FILE);
        }
        Self::defaults()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<EngineConfig> {
        let Some(path) = &self.path else {
            debug!("No engine config file, using defaults");
            return Ok(EngineConfig::default());
        };
        info!("Loading engine configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = EngineConfig::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        info!(
            max_call_depth = config.max_call_depth,
            detect_cycles = config.detect_cycles,
            "Loaded engine configuration"
        );
        Ok(config)
    }
}
