// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Configuration for caches and work contexts

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cache::CachePolicy;
use crate::error::{Result, WorkError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkscopeConfig {
    /// Cache region settings
    pub cache: CacheConfig,

    /// Work context settings
    pub context: ContextConfig,
}

/// Settings shared by cache regions and the expiry sweeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable/disable caching entirely; disabled regions always compute
    pub enabled: bool,

    /// How often the background sweep runs (milliseconds)
    pub sweep_interval_ms: u64,

    /// How long a sweep waits for the write lock before skipping (milliseconds)
    pub sweep_lock_timeout_ms: u64,

    /// Policy used when callers do not supply one
    pub default_policy: CachePolicy,
}

/// Settings for work context nesting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum number of nested levels in one work context
    pub max_nesting_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_ms: 60_000,   // 1 minute
            sweep_lock_timeout_ms: 50,
            default_policy: CachePolicy::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 64,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn sweep_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_lock_timeout_ms)
    }
}

impl WorkscopeConfig {
    /// Configuration for read-heavy workloads: longer sliding lifetimes, rarer sweeps
    pub fn read_optimized() -> Self {
        Self {
            cache: CacheConfig {
                sweep_interval_ms: 300_000, // 5 minutes
                default_policy: CachePolicy::default()
                    .with_sliding_expiration(Duration::from_secs(1800)),
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }

    /// Configuration where reads always go to the source and results are
    /// written back for other callers
    pub fn write_through() -> Self {
        let mut config = Self::default();
        config.cache.default_policy = CachePolicy::write_only();
        config
    }

    /// Parse configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WorkError::Config(format!("Invalid configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WorkError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        log::debug!("Loading workscope configuration from {}", path.display());
        Self::from_json_str(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.context.max_nesting_depth == 0 {
            return Err(WorkError::Config(
                "context.max_nesting_depth must be > 0".to_string(),
            ));
        }

        if !self.cache.enabled {
            return Ok(());
        }

        if self.cache.sweep_interval_ms == 0 {
            return Err(WorkError::Config(
                "cache.sweep_interval_ms must be > 0".to_string(),
            ));
        }

        if self.cache.sweep_lock_timeout_ms == 0 {
            return Err(WorkError::Config(
                "cache.sweep_lock_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.cache.sweep_lock_timeout_ms >= self.cache.sweep_interval_ms {
            return Err(WorkError::Config(format!(
                "Sweep lock timeout ({} ms) must be shorter than the sweep interval ({} ms)",
                self.cache.sweep_lock_timeout_ms, self.cache.sweep_interval_ms
            )));
        }

        Ok(())
    }
}
