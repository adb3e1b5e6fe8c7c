//! Index build configuration: tree shape, page geometry and cache budget.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::star::StarRecord;

/// Deepest subdivision level supported by 64-bit nested cell indices.
pub const MAX_SUPPORTED_DEPTH: u8 = 29;

/// Smallest supported page size in bytes.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size in bytes.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Bytes of every page reserved for the page header and node framing.
///
/// A leaf page holds at most `page_size - LEAF_PAGE_OVERHEAD` bytes of
/// encoded star records.
pub const LEAF_PAGE_OVERHEAD: usize = 64;

/// Spatial index build configuration.
///
/// # Validation Rules
///
/// - `leaf_capacity` must be >= 1
/// - `max_depth` must be <= 29
/// - `page_size` must be a power of two in 512..=65536
/// - a full leaf (`leaf_capacity` worst-case records) must fit in one page
/// - `cache_budget_bytes` must be >= `page_size`
///
/// # Example
///
/// ```no_run
/// # use starmap_types::config::IndexConfig;
/// let config = IndexConfig::builder()
///     .leaf_capacity(128)
///     .max_depth(10)
///     .cache_budget_bytes(256 * 1024 * 1024)
///     .build()
///     .expect("valid index config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexConfig {
    /// Maximum number of stars a leaf holds before it splits.
    ///
    /// Leaves at `max_depth` never split and may exceed this value.
    #[serde(default = "default_leaf_capacity")]
    pub leaf_capacity: u32,
    /// Deepest level a leaf can be split to (base cells are depth 0).
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
    /// Fixed page size of the bundle in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Approximate upper bound on memory held by resident nodes.
    #[serde(default = "default_cache_budget_bytes")]
    pub cache_budget_bytes: usize,
    /// Whether sealing syncs pages and header to durable storage.
    #[serde(default = "default_sync_on_seal")]
    pub sync_on_seal: bool,
}

#[bon::bon]
impl IndexConfig {
    /// Creates a new index configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any rule listed on
    /// [`IndexConfig`] is violated.
    #[builder]
    pub fn new(
        #[builder(default = default_leaf_capacity())] leaf_capacity: u32,
        #[builder(default = default_max_depth())] max_depth: u8,
        #[builder(default = default_page_size())] page_size: usize,
        #[builder(default = default_cache_budget_bytes())] cache_budget_bytes: usize,
        #[builder(default = default_sync_on_seal())] sync_on_seal: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { leaf_capacity, max_depth, page_size, cache_budget_bytes, sync_on_seal };
        config.validate()?;
        Ok(config)
    }
}

impl IndexConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leaf_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "leaf_capacity must be >= 1".to_string(),
            });
        }
        if self.max_depth > MAX_SUPPORTED_DEPTH {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_depth must be <= {}, got {}",
                    MAX_SUPPORTED_DEPTH, self.max_depth
                ),
            });
        }
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(ConfigError::Validation {
                message: format!(
                    "page_size must be a power of two in {}..={}, got {}",
                    MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
                ),
            });
        }
        let worst_leaf = self.leaf_capacity as usize * StarRecord::MAX_ENCODED_LEN;
        if worst_leaf > self.page_size - LEAF_PAGE_OVERHEAD {
            return Err(ConfigError::Validation {
                message: format!(
                    "leaf_capacity {} needs up to {} bytes per leaf but page_size {} holds {}",
                    self.leaf_capacity,
                    worst_leaf,
                    self.page_size,
                    self.page_size - LEAF_PAGE_OVERHEAD
                ),
            });
        }
        if self.cache_budget_bytes < self.page_size {
            return Err(ConfigError::Validation {
                message: format!(
                    "cache_budget_bytes must be >= page_size ({}), got {}",
                    self.page_size, self.cache_budget_bytes
                ),
            });
        }
        Ok(())
    }

    /// Largest leaf capacity that always fits in a page of `page_size` bytes.
    pub fn max_leaf_capacity_for(page_size: usize) -> u32 {
        (page_size.saturating_sub(LEAF_PAGE_OVERHEAD) / StarRecord::MAX_ENCODED_LEN) as u32
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: default_leaf_capacity(),
            max_depth: default_max_depth(),
            page_size: default_page_size(),
            cache_budget_bytes: default_cache_budget_bytes(),
            sync_on_seal: default_sync_on_seal(),
        }
    }
}

fn default_leaf_capacity() -> u32 {
    256
}

fn default_max_depth() -> u8 {
    12 // ~0.014 deg² cells
}

fn default_page_size() -> usize {
    16 * 1024
}

fn default_cache_budget_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_sync_on_seal() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_index_config_defaults_are_valid() {
        let config = IndexConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.leaf_capacity, 256);
        assert_eq!(config.max_depth, 12);
        assert_eq!(config.page_size, 16 * 1024);
        assert_eq!(config.cache_budget_bytes, 64 * 1024 * 1024);
        assert!(config.sync_on_seal);
        assert_eq!(config, IndexConfig::default());
    }

    #[test]
    fn test_index_config_builder_with_custom_values() {
        let config = IndexConfig::builder()
            .leaf_capacity(16)
            .max_depth(8)
            .page_size(4096)
            .cache_budget_bytes(1 << 20)
            .sync_on_seal(false)
            .build()
            .expect("valid custom config");
        assert_eq!(config.leaf_capacity, 16);
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.page_size, 4096);
        assert!(!config.sync_on_seal);
    }

    #[test]
    fn test_index_config_zero_capacity() {
        let err = IndexConfig::builder().leaf_capacity(0).build().unwrap_err();
        assert!(err.to_string().contains("leaf_capacity"));
    }

    #[test]
    fn test_index_config_max_depth_limit() {
        assert!(IndexConfig::builder().max_depth(29).build().is_ok());
        let err = IndexConfig::builder().max_depth(30).build().unwrap_err();
        assert!(err.to_string().contains("max_depth"));
    }

    #[test]
    fn test_index_config_page_size_must_be_power_of_two() {
        let err = IndexConfig::builder().page_size(5000).leaf_capacity(1).build().unwrap_err();
        assert!(err.to_string().contains("page_size"));
        assert!(IndexConfig::builder().page_size(256).leaf_capacity(1).build().is_err());
        assert!(IndexConfig::builder().page_size(1 << 17).build().is_err());
    }

    #[test]
    fn test_index_config_leaf_must_fit_page() {
        let max = IndexConfig::max_leaf_capacity_for(4096);
        assert!(IndexConfig::builder().page_size(4096).leaf_capacity(max).build().is_ok());

        let err =
            IndexConfig::builder().page_size(4096).leaf_capacity(max + 1).build().unwrap_err();
        assert!(err.to_string().contains("leaf_capacity"), "got: {err}");
    }

    #[test]
    fn test_index_config_cache_budget_minimum() {
        let err = IndexConfig::builder().cache_budget_bytes(1024).build().unwrap_err();
        assert!(err.to_string().contains("cache_budget_bytes"));
    }
}
