//! Configuration service abstraction for dependency injection and test
//! isolation.
//!
//! A [`ConfigService`] hides where settings live so the engine and the tests
//! can share one code path. The production implementation layers the user's
//! TOML file with `LANGKIT_*` environment variables; the test implementation
//! operates entirely inside a caller-provided directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use config::{Config as ConfigCrate, Environment, File};
use log::debug;

use crate::config::Settings;
use crate::error::LangkitError;
use crate::Result;

/// Configuration service trait.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to share
/// across the server, the task engine and the provider registry.
pub trait ConfigService: Send + Sync {
    /// Get the current settings.
    ///
    /// Returns a clone of the cached settings, loading them on first use.
    fn get_settings(&self) -> Result<Settings>;

    /// Force a reload from all sources, discarding the cache.
    fn reload(&self) -> Result<()>;

    /// Persist the given settings to the configuration file and replace the
    /// cached copy.
    fn save_settings(&self, settings: &Settings) -> Result<()>;

    /// Path of the configuration file.
    fn config_file_path(&self) -> PathBuf;

    /// Root directory for langkit state (model caches, downloaded tools).
    fn config_root(&self) -> PathBuf;
}

/// Production configuration service.
///
/// Sources, lowest priority first: defaults, the user config file,
/// `LANGKIT_*` environment variables.
pub struct ProductionConfigService {
    config_file: PathBuf,
    config_root: PathBuf,
    cached: Arc<RwLock<Option<Settings>>>,
}

impl ProductionConfigService {
    /// Create a service rooted at the platform config directory.
    pub fn new() -> Result<Self> {
        let root = crate::config::default_config_root();
        Ok(Self::with_root(root))
    }

    /// Create a service rooted at an explicit directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.toml"),
            config_root: root,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    fn load(&self) -> Result<Settings> {
        let builder = ConfigCrate::builder()
            .add_source(File::from(self.config_file.clone()).required(false))
            .add_source(Environment::with_prefix("LANGKIT").separator("__"));
        let settings: Settings = builder.build()?.try_deserialize()?;
        debug!("loaded settings from {}", self.config_file.display());
        Ok(settings)
    }

    fn write_file(&self, settings: &Settings) -> Result<()> {
        let text = toml::to_string_pretty(settings)
            .map_err(|e| LangkitError::config(format!("settings serialization failed: {}", e)))?;
        if let Some(parent) = self.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_file, text)?;
        Ok(())
    }
}

impl ConfigService for ProductionConfigService {
    fn get_settings(&self) -> Result<Settings> {
        {
            let cached = self.cached.read().unwrap();
            if let Some(settings) = cached.as_ref() {
                return Ok(settings.clone());
            }
        }
        let settings = self.load()?;
        *self.cached.write().unwrap() = Some(settings.clone());
        Ok(settings)
    }

    fn reload(&self) -> Result<()> {
        let settings = self.load()?;
        *self.cached.write().unwrap() = Some(settings);
        Ok(())
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write_file(settings)?;
        *self.cached.write().unwrap() = Some(settings.clone());
        Ok(())
    }

    fn config_file_path(&self) -> PathBuf {
        self.config_file.clone()
    }

    fn config_root(&self) -> PathBuf {
        self.config_root.clone()
    }
}

/// Test configuration service confined to a caller-owned directory.
///
/// No environment layering, so parallel tests cannot bleed into each other.
pub struct TestConfigService {
    config_file: PathBuf,
    config_root: PathBuf,
    cached: Arc<RwLock<Settings>>,
}

impl TestConfigService {
    /// Create a test service rooted at `root` with the given settings.
    pub fn new(root: &Path, settings: Settings) -> Self {
        Self {
            config_file: root.join("config.toml"),
            config_root: root.to_path_buf(),
            cached: Arc::new(RwLock::new(settings)),
        }
    }

    /// Create a test service rooted at `root` with default settings.
    pub fn with_defaults(root: &Path) -> Self {
        Self::new(root, Settings::default())
    }
}

impl ConfigService for TestConfigService {
    fn get_settings(&self) -> Result<Settings> {
        Ok(self.cached.read().unwrap().clone())
    }

    fn reload(&self) -> Result<()> {
        if self.config_file.exists() {
            let text = std::fs::read_to_string(&self.config_file)?;
            let settings: Settings = toml::from_str(&text)
                .map_err(|e| LangkitError::config(format!("invalid test settings: {}", e)))?;
            *self.cached.write().unwrap() = settings;
        }
        Ok(())
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        let text = toml::to_string_pretty(settings)
            .map_err(|e| LangkitError::config(format!("settings serialization failed: {}", e)))?;
        std::fs::create_dir_all(&self.config_root)?;
        std::fs::write(&self.config_file, text)?;
        *self.cached.write().unwrap() = settings.clone();
        Ok(())
    }

    fn config_file_path(&self) -> PathBuf {
        self.config_file.clone()
    }

    fn config_root(&self) -> PathBuf {
        self.config_root.clone()
    }
}
