//! YAML configuration for the `chordgrid` tool.
//!
//! ```yaml
//! store: chordgrid-store.yaml
//! log-level: info
//! rhythms:
//!   - name: Strathspey
//!     signature: 4/4
//!     beats-per-bar: 4
//! ```
//!
//! `rhythms` only seeds the registry: once rhythms have been saved to the
//! store, the store wins.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rhythm::{Rhythm, RhythmRegistry};
use crate::store::{KeyValueStore, YamlFileStore};

pub const DEFAULT_STORE_FILE: &str = "chordgrid-store.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Key/value store file; relative paths are resolved next to the config file
    #[serde(default = "default_store")]
    pub store: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub rhythms: Vec<RhythmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RhythmConfig {
    pub name: String,
    pub signature: String,
    pub beats_per_bar: u32,
}

fn default_store() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILE)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: default_store(),
            log_level: default_log_level(),
            rhythms: Vec::new(),
        }
    }
}

impl Config {
    /// Load the configuration file. A missing file gives the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            Self::from_yaml(&contents)?
        } else {
            debug!("Config file {:?} not found, using defaults", path);
            Self::default()
        };
        if config.store.is_relative() {
            if let Some(dir) = path.parent() {
                config.store = dir.join(&config.store);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    pub fn open_store(&self) -> Result<YamlFileStore> {
        YamlFileStore::open(&self.store)
            .with_context(|| format!("Failed to open store {:?}", self.store))
    }

    /// The registry used before anything is persisted: the configured
    /// rhythms, or the built-in defaults when none are configured.
    pub fn seed_registry(&self) -> RhythmRegistry {
        if self.rhythms.is_empty() {
            return RhythmRegistry::with_defaults();
        }
        let mut registry = RhythmRegistry::new();
        for rhythm in &self.rhythms {
            match Rhythm::new(&rhythm.name, &rhythm.signature, rhythm.beats_per_bar) {
                Ok(r) => registry.add(r),
                Err(e) => warn!("Ignoring configured rhythm '{}': {}", rhythm.name, e),
            }
        }
        registry
    }

    /// Load the rhythm registry from `store`, seeded from this configuration.
    pub fn load_registry(&self, store: &dyn KeyValueStore) -> Result<RhythmRegistry> {
        RhythmRegistry::load_or(store, self.seed_registry()).context("Failed to load rhythms")
    }
}
