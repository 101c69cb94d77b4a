//! Viewer configuration
//!
//! All tunables of the tile-streaming core live here so front ends can build
//! them from command-line flags.

use std::time::Duration;

/// What happens to cached tiles that scroll out of view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep every tile until the map identity changes
    #[default]
    Never,
    /// Drop tiles lying more than this many tiles outside the visible range
    ViewportMargin(u32),
}

/// Configuration for the chunk viewer
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    /// Base URL of the map server (e.g., "http://127.0.0.1:3001")
    pub base_url: String,
    /// Maximum number of tile fetches in flight at once
    pub max_concurrent: usize,
    /// Pixels per world unit
    pub scale: f64,
    /// Tile edge length in world units
    pub tile_size: i64,
    /// Idle window before a typed seed is converted
    pub seed_debounce: Duration,
    /// Off-screen tile handling
    pub eviction: EvictionPolicy,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            max_concurrent: 10,
            scale: 2.0,
            tile_size: 16,
            seed_debounce: Duration::from_millis(2000),
            eviction: EvictionPolicy::Never,
        }
    }
}

impl ViewerConfig {
    /// Edge length of one tile in pixels
    pub fn tile_px(&self) -> f64 {
        self.scale * self.tile_size as f64
    }

    /// Check that the configuration can drive a viewer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        if self.tile_size <= 0 {
            return Err(ConfigError::InvalidTileSize(self.tile_size));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        Ok(())
    }
}

/// Errors for configurations that cannot be used
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    InvalidConcurrency,
    InvalidScale(f64),
    InvalidTileSize(i64),
    MissingBaseUrl,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidConcurrency => write!(f, "Concurrency must be at least 1"),
            ConfigError::InvalidScale(s) => write!(f, "Invalid scale: {}", s),
            ConfigError::InvalidTileSize(t) => write!(f, "Invalid tile size: {}", t),
            ConfigError::MissingBaseUrl => write!(f, "No server base URL given"),
        }
    }
}

impl std::error::Error for ConfigError {}
