//! Engine tuning knobs, loadable from a JSON file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_CHUNK_SIZE;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of one cached chunk in bytes.
    pub chunk_size: u64,
    /// Resident bytes above which distant chunks are evicted.
    pub cache_ceiling_bytes: u64,
    /// Number of (tab, pattern) search results kept.
    pub search_cache_capacity: usize,
    /// Bytes handed to the metadata parser.
    pub metadata_header_len: u64,
    pub bytes_per_row: u64,
    pub timeouts: TimeoutPolicy,
    /// Minimum spacing of loading-state updates pushed to the host.
    pub state_sync_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_ceiling_bytes: 256 * MIB,
            search_cache_capacity: 20,
            metadata_header_len: 64 * 1024,
            bytes_per_row: 16,
            timeouts: TimeoutPolicy::default(),
            state_sync_interval_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(self.bytes_per_row > 0, "bytes_per_row must be positive");
        anyhow::ensure!(
            self.cache_ceiling_bytes >= self.chunk_size,
            "cache_ceiling_bytes ({}) is smaller than one chunk ({})",
            self.cache_ceiling_bytes,
            self.chunk_size
        );
        anyhow::ensure!(self.search_cache_capacity > 0, "search_cache_capacity must be positive");
        self.timeouts.validate()
    }

    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_millis(self.state_sync_interval_ms)
    }
}

/// Per-call timeout scaled by input size and clamped to `[floor, ceiling]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub floor_ms: u64,
    pub ceiling_ms: u64,
    pub ms_per_mib: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            floor_ms: 30_000,
            ceiling_ms: 600_000,
            ms_per_mib: 50,
        }
    }
}

impl TimeoutPolicy {
    pub fn fixed(ms: u64) -> Self {
        Self {
            floor_ms: ms,
            ceiling_ms: ms,
            ms_per_mib: 0,
        }
    }

    pub fn timeout_for(&self, input_bytes: u64) -> Duration {
        let mib = input_bytes.div_ceil(MIB);
        let ms = self
            .floor_ms
            .saturating_add(mib.saturating_mul(self.ms_per_mib))
            .clamp(self.floor_ms, self.ceiling_ms);
        Duration::from_millis(ms)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.floor_ms <= self.ceiling_ms,
            "timeout floor ({} ms) exceeds ceiling ({} ms)",
            self.floor_ms,
            self.ceiling_ms
        );
        Ok(())
    }
}
