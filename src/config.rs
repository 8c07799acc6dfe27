//! Configuration for the redo log
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{RedoError, Result};

/// Main configuration for a RedoLogManager instance
#[derive(Debug, Clone)]
pub struct RedoConfig {
    // -------------------------------------------------------------------------
    // File Layout
    // -------------------------------------------------------------------------
    /// Path of the active (writable) segment
    ///   {data_dir}/
    ///     ├── redo.log              (active segment)
    ///     └── archive/              (redo-{millis}-seq{N}.log)
    pub log_path: PathBuf,

    /// Directory holding archived segments
    pub archive_dir: PathBuf,

    /// Where rollover moves the closed segment (defaults to `archive_dir`)
    pub rollover_dest_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Rollover
    // -------------------------------------------------------------------------
    /// Roll over automatically once the active segment exceeds this many
    /// bytes. Zero disables automatic rollover.
    pub rollover_file_size: u64,
}

/// Sync strategy for the active segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every record; `log()` returns only once the record is durable
    EveryWrite,

    /// fsync after N records (group commit, weaker durability)
    EveryNEntries { count: usize },
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("redolog/redo.log"),
            archive_dir: PathBuf::from("redolog/archive"),
            rollover_dest_dir: None,
            sync_strategy: SyncStrategy::EveryWrite,
            rollover_file_size: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

impl RedoConfig {
    const LOG_FILENAME: &'static str = "redo.log";
    const ARCHIVE_DIR: &'static str = "archive";

    /// Create a new config builder
    pub fn builder() -> RedoConfigBuilder {
        RedoConfigBuilder::default()
    }

    /// Config rooted at a single data directory
    pub fn with_data_dir(path: impl AsRef<Path>) -> Self {
        Self::builder().data_dir(path).build()
    }

    /// Directory rollover moves closed segments into
    pub fn rollover_dest_dir(&self) -> &Path {
        self.rollover_dest_dir
            .as_deref()
            .unwrap_or(&self.archive_dir)
    }

    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.log_path.as_os_str().is_empty() {
            return Err(RedoError::Config("log path is empty".to_string()));
        }
        if self.log_path.file_name().is_none() {
            return Err(RedoError::Config(format!(
                "log path {} does not name a file",
                self.log_path.display()
            )));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(RedoError::Config(
                "EveryNEntries sync count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RedoConfig
#[derive(Default)]
pub struct RedoConfigBuilder {
    config: RedoConfig,
}

impl RedoConfigBuilder {
    /// Place the active log and the archive under one directory
    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.config.log_path = path.join(RedoConfig::LOG_FILENAME);
        self.config.archive_dir = path.join(RedoConfig::ARCHIVE_DIR);
        self
    }

    /// Set the active segment path
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = path.into();
        self
    }

    /// Set the archive directory
    pub fn archive_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.archive_dir = path.into();
        self
    }

    /// Override where rollover places closed segments
    pub fn rollover_dest_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rollover_dest_dir = Some(path.into());
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the automatic rollover threshold (in bytes, 0 disables)
    pub fn rollover_file_size(mut self, bytes: u64) -> Self {
        self.config.rollover_file_size = bytes;
        self
    }

    pub fn build(self) -> RedoConfig {
        self.config
    }
}
