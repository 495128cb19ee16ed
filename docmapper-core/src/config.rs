//! Mapper configuration.

use serde::{Deserialize, Serialize};

use crate::error::MapperResult;

/// Settings shared by every operation issued through a [`Context`](crate::context::Context).
///
/// # Example
///
/// ```ignore
/// use docmapper::config::MapperConfig;
///
/// let config = MapperConfig::from_json_str(r#"{ "default_per_page": 50 }"#)?;
/// assert_eq!(config.batch_size, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MapperConfig {
    /// Page size used by `paginate` when it is given a `per_page` of zero.
    pub default_per_page: usize,
    /// Number of records fetched per round-trip by `find_each`.
    pub batch_size: usize,
}

impl MapperConfig {
    pub fn builder() -> MapperConfigBuilder {
        MapperConfigBuilder::default()
    }

    /// Loads a configuration from JSON. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Serialization`](crate::error::MapperError::Serialization)
    /// if the input is not valid JSON for this type.
    pub fn from_json_str(input: &str) -> MapperResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            default_per_page: 25,
            batch_size: 100,
        }
    }
}

/// Builder for [`MapperConfig`].
#[derive(Default)]
pub struct MapperConfigBuilder {
    default_per_page: Option<usize>,
    batch_size: Option<usize>,
}

impl MapperConfigBuilder {
    pub fn with_default_per_page(mut self, per_page: usize) -> Self {
        self.default_per_page = Some(per_page);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Builds the configuration. Unset values use the defaults.
    pub fn build(self) -> MapperConfig {
        let defaults = MapperConfig::default();
        MapperConfig {
            default_per_page: self.default_per_page.unwrap_or(defaults.default_per_page),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
        }
    }
}
