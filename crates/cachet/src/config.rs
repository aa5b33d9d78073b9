//! Cache configuration
//!
//! [`CacheSettings`] holds the plain, serializable knobs and can be read from
//! JSON. [`CacheConfig`] adds the runtime collaborators: loader, writer and
//! listeners registered at creation.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use cachetdb::{CacheLoader, CacheWriter};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::listener::ListenerBinding;

/// Default number of table and lock shards
pub const DEFAULT_SHARDS: usize = 16;

/// What to do with errors raised by listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerFailurePolicy {
    /// Return failures to the caller in the call's `Outcome`
    #[default]
    Report,
    /// Emit failures as warnings; the caller's `Outcome` stays clean
    Log,
}

/// Serializable cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Load missing keys through the loader
    pub read_through: bool,
    /// Propagate mutations to the writer before returning
    pub write_through: bool,
    /// Record hit/miss and operation counters
    pub statistics: bool,
    /// Number of table and lock shards
    pub shards: usize,
    /// Listener error handling
    pub listener_failures: ListenerFailurePolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            read_through: false,
            write_through: false,
            statistics: true,
            shards: DEFAULT_SHARDS,
            listener_failures: ListenerFailurePolicy::Report,
        }
    }
}

impl CacheSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Read settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

/// Everything needed to create a cache
pub struct CacheConfig<K> {
    pub(crate) settings: CacheSettings,
    pub(crate) loader: Option<Arc<dyn CacheLoader<K>>>,
    pub(crate) writer: Option<Arc<dyn CacheWriter<K>>>,
    pub(crate) listeners: Vec<ListenerBinding<K>>,
}

impl<K> Default for CacheConfig<K> {
    fn default() -> Self {
        Self {
            settings: CacheSettings::default(),
            loader: None,
            writer: None,
            listeners: Vec::new(),
        }
    }
}

impl<K> fmt::Debug for CacheConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("settings", &self.settings)
            .field("loader", &self.loader.is_some())
            .field("writer", &self.writer.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<K> CacheConfig<K> {
    /// A plain cache: no store, statistics on
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing settings
    pub fn from_settings(settings: CacheSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Enable read-through with `loader`
    pub fn read_through<L>(self, loader: L) -> Self
    where
        L: CacheLoader<K> + 'static,
    {
        self.read_through_shared(Arc::new(loader))
    }

    /// Enable read-through with a shared loader
    pub fn read_through_shared(mut self, loader: Arc<dyn CacheLoader<K>>) -> Self {
        self.settings.read_through = true;
        self.loader = Some(loader);
        self
    }

    /// Enable write-through with `writer`
    pub fn write_through<W>(self, writer: W) -> Self
    where
        W: CacheWriter<K> + 'static,
    {
        self.write_through_shared(Arc::new(writer))
    }

    /// Enable write-through with a shared writer
    pub fn write_through_shared(mut self, writer: Arc<dyn CacheWriter<K>>) -> Self {
        self.settings.write_through = true;
        self.writer = Some(writer);
        self
    }

    /// Attach a loader without enabling read-through (settings decide)
    pub fn with_loader(mut self, loader: Arc<dyn CacheLoader<K>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Attach a writer without enabling write-through (settings decide)
    pub fn with_writer(mut self, writer: Arc<dyn CacheWriter<K>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Register a listener when the cache is created
    pub fn listener(mut self, binding: ListenerBinding<K>) -> Self {
        self.listeners.push(binding);
        self
    }

    /// Turn statistics on or off
    pub fn statistics(mut self, enabled: bool) -> Self {
        self.settings.statistics = enabled;
        self
    }

    /// Number of table and lock shards
    pub fn shards(mut self, shards: usize) -> Self {
        self.settings.shards = shards;
        self
    }

    /// Listener error handling
    pub fn listener_failures(mut self, policy: ListenerFailurePolicy) -> Self {
        self.settings.listener_failures = policy;
        self
    }

    /// Current settings
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Check that every enabled feature has its collaborator
    pub fn validate(&self) -> Result<()> {
        if self.settings.shards == 0 {
            return Err(CacheError::Config("shards must be greater than 0".to_string()));
        }
        if self.settings.read_through && self.loader.is_none() {
            return Err(CacheError::Config("read-through enabled without a loader".to_string()));
        }
        if self.settings.write_through && self.writer.is_none() {
            return Err(CacheError::Config("write-through enabled without a writer".to_string()));
        }
        Ok(())
    }
}
