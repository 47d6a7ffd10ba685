//! # Config - Commit Log Configuration
//!
//! Settings consumed by the storage core. Only `max_index_bytes` is enforced
//! (it bounds the pre-allocated, memory-mapped index file). `max_store_bytes`
//! belongs to the same surface so a log-management layer can decide when a
//! segment is full, but nothing in the core rotates segments.
//!
//! ## Environment
//!
//! ```text
//! COMMITLOG_MAX_STORE_BYTES  store size bound      (default: 1048576 = 1 MiB)
//! COMMITLOG_MAX_INDEX_BYTES  index pre-allocation  (default: 1048576 = 1 MiB)
//! COMMITLOG_INITIAL_OFFSET   first segment base    (default: 0)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::Config;
//!
//! let cfg = Config::from_env().unwrap();
//! cfg.validate().unwrap();
//! println!("index bound: {} bytes", cfg.segment.max_index_bytes);
//! ```

use thiserror::Error;

/// Width of one index entry: 4-byte relative offset + 8-byte store position.
/// Must match `index::ENTRY_WIDTH`.
pub const INDEX_ENTRY_BYTES: u64 = 4 + 8;

/// Default bound for a segment's store file (1 MiB).
pub const DEFAULT_MAX_STORE_BYTES: u64 = 1024 * 1024;
/// Default pre-allocation for a segment's index file (1 MiB).
pub const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024;

pub const ENV_MAX_STORE_BYTES: &str = "COMMITLOG_MAX_STORE_BYTES";
pub const ENV_MAX_INDEX_BYTES: &str = "COMMITLOG_MAX_INDEX_BYTES";
pub const ENV_INITIAL_OFFSET: &str = "COMMITLOG_INITIAL_OFFSET";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    /// The index bound cannot hold a single entry.
    #[error("max_index_bytes {max_index_bytes} is smaller than one index entry ({} bytes)", INDEX_ENTRY_BYTES)]
    IndexTooSmall { max_index_bytes: u64 },
}

/// Per-segment limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Upper bound for the store file. Reported, not enforced.
    pub max_store_bytes: u64,
    /// Size the index file is pre-allocated (and mapped) to while open.
    pub max_index_bytes: u64,
    /// Base offset used by `Segment::open_initial`.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            initial_offset: 0,
        }
    }
}

impl SegmentConfig {
    /// Returns a config whose index holds exactly `entries` entries.
    ///
    /// Counts too large to express in bytes saturate at `u64::MAX`.
    #[must_use]
    pub fn with_index_entries(entries: u64) -> Self {
        Self {
            max_index_bytes: entries.saturating_mul(INDEX_ENTRY_BYTES),
            ..Self::default()
        }
    }

    /// Number of whole entries the index bound can hold.
    #[must_use]
    pub fn index_entry_capacity(&self) -> u64 {
        self.max_index_bytes / INDEX_ENTRY_BYTES
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_index_bytes < INDEX_ENTRY_BYTES {
            return Err(ConfigError::IndexTooSmall {
                max_index_bytes: self.max_index_bytes,
            });
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub segment: SegmentConfig,
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to something that
    /// is not an unsigned integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// Tests use this to avoid mutating the shared process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SegmentConfig::default();
        let segment = SegmentConfig {
            max_store_bytes: parse_or(&lookup, ENV_MAX_STORE_BYTES, defaults.max_store_bytes)?,
            max_index_bytes: parse_or(&lookup, ENV_MAX_INDEX_BYTES, defaults.max_index_bytes)?,
            initial_offset: parse_or(&lookup, ENV_INITIAL_OFFSET, defaults.initial_offset)?,
        };
        Ok(Self { segment })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.segment.validate()
    }
}

/// Reads `key` through `lookup`, returning `default` when unset.
fn parse_or<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(v) => Ok(v),
            Err(_) => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}
