//! Plugin configuration: catalog definitions, read options, transport limits.
//!
//! Configuration is a JSON document loaded once at startup. Catalogs are
//! validated while the registry is built, so a plugin never serves a
//! partially populated namespace.
//!
//! ```json
//! {
//!   "catalogs": [
//!     {
//!       "id": "/A/B/C",
//!       "description": "Test catalog /A/B/C.",
//!       "properties": { "a": "b" },
//!       "resources": [
//!         {
//!           "id": "resource1",
//!           "unit": "°C",
//!           "groups": ["group1"],
//!           "representations": [{ "data_type": "FLOAT64", "sampling_period": 1.0 }]
//!         }
//!       ]
//!     }
//!   ],
//!   "read": { "chunk_samples": 65536, "parallel": false },
//!   "transport": {
//!     "max_frame_bytes": 67108864,
//!     "max_read_bytes": 268435456,
//!     "max_concurrent_reads": 16
//!   }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogId, Resource, ResourceCatalog};
use crate::data_source::CatalogDataSource;
use crate::error::{ConfigError, Result};
use crate::read::{ReadEngine, ReadOptions};
use crate::registry::{CatalogEntry, CatalogRegistry};
use crate::representation::{DataType, Representation};
use crate::source::{SourceMap, TickIndexSource};
use crate::window::TimeRange;

/// Default maximum size of one frame on the host channel (64 MiB).
const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Smallest accepted frame limit.
const MIN_FRAME_BYTES: usize = 1024;

/// Default buffer budget of one `read` call (256 MiB).
const DEFAULT_MAX_READ_BYTES: u64 = 256 * 1024 * 1024;

/// Default number of reads one connection runs at once.
const DEFAULT_MAX_CONCURRENT_READS: usize = 16;

/// Top-level plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Catalogs served by the plugin.
    pub catalogs: Vec<CatalogConfig>,

    /// Read engine options.
    #[serde(default)]
    pub read: ReadOptions,

    /// Host channel limits.
    #[serde(default)]
    pub transport: TransportOptions,

    /// URI scheme the host's resource locator must use, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scheme: Option<String>,
}

/// One catalog definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// The catalog schema.
    #[serde(flatten)]
    pub catalog: ResourceCatalog,

    /// Description returned in registrations.
    #[serde(default)]
    pub description: String,

    /// Coverage of the catalog. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

/// Limits of the host channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Largest accepted or produced frame in bytes.
    pub max_frame_bytes: usize,

    /// Largest total of data and status bytes one `read` call may allocate.
    pub max_read_bytes: u64,

    /// Reads one connection runs at once. Further reads are rejected.
    pub max_concurrent_reads: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_concurrent_reads: DEFAULT_MAX_CONCURRENT_READS,
        }
    }
}

impl Default for PluginConfig {
    /// A single illustrative catalog `/A/B/C` with two resources.
    fn default() -> Self {
        Self {
            catalogs: vec![CatalogConfig {
                catalog: example_catalog(),
                description: "Test catalog /A/B/C.".to_string(),
                time_range: None,
            }],
            read: ReadOptions::default(),
            transport: TransportOptions::default(),
            required_scheme: None,
        }
    }
}

impl PluginConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be read or parsed, and any validation error of
    /// [`PluginConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates options and every catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range options and
    /// [`CatalogError`](crate::error::CatalogError) for invalid catalogs.
    pub fn validate(&self) -> Result<()> {
        self.read.validate()?;

        if self.transport.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "transport.max_frame_bytes must be >= {MIN_FRAME_BYTES}, got {}",
                    self.transport.max_frame_bytes
                ),
            }
            .into());
        }
        if self.transport.max_read_bytes == 0 || self.transport.max_concurrent_reads == 0 {
            return Err(ConfigError::Invalid {
                reason: "transport.max_read_bytes and transport.max_concurrent_reads must be > 0"
                    .to_string(),
            }
            .into());
        }

        self.registry().map(|_| ())
    }

    /// Builds the catalog registry.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`](crate::error::CatalogError) if a catalog is
    /// invalid or registered twice.
    pub fn registry(&self) -> Result<CatalogRegistry> {
        CatalogRegistry::new(
            self.catalogs
                .iter()
                .map(|c| {
                    CatalogEntry::new(c.catalog.clone(), &c.description)
                        .with_time_range(c.time_range.unwrap_or(TimeRange::UNBOUNDED))
                })
                .collect(),
        )
    }

    /// Builds one tick-index source per catalog, limited to its time range.
    pub fn sources(&self) -> SourceMap {
        let mut sources = SourceMap::new();
        for c in &self.catalogs {
            let coverage = c.time_range.unwrap_or(TimeRange::UNBOUNDED);
            sources.insert(
                c.catalog.id.as_str(),
                Arc::new(TickIndexSource::with_coverage(coverage)),
            );
        }
        sources
    }

    /// Builds the complete data source.
    ///
    /// # Errors
    ///
    /// See [`PluginConfig::validate`].
    pub fn build_data_source(&self) -> Result<CatalogDataSource<SourceMap>> {
        self.validate()?;
        let engine = ReadEngine::new(self.sources(), self.read);
        let source = CatalogDataSource::new(Arc::new(self.registry()?), engine);
        Ok(match &self.required_scheme {
            Some(scheme) => source.with_required_scheme(scheme),
            None => source,
        })
    }
}

/// `/A/B/C` with a FLOAT64 and an INT64 resource at one second.
fn example_catalog() -> ResourceCatalog {
    let second = Duration::from_secs(1);
    let resources = vec![
        Resource {
            id: "resource1".to_string(),
            unit: Some("°C".to_string()),
            groups: ["group1".to_string()].into(),
            representations: vec![Representation {
                data_type: DataType::Float64,
                sampling_period: second,
            }],
        },
        Resource {
            id: "resource2".to_string(),
            unit: Some("bar".to_string()),
            groups: ["group2".to_string()].into(),
            representations: vec![Representation {
                data_type: DataType::Int64,
                sampling_period: second,
            }],
        },
    ];

    ResourceCatalog {
        id: CatalogId::new_unchecked("/A/B/C"),
        properties: [("a".to_string(), "b".to_string())].into(),
        resources,
    }
}
