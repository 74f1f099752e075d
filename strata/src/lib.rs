//! # strata
//!
//! Catalog registry and windowed read engine for time-series data source
//! plugins.
//!
//! A data source publishes a hierarchy of catalogs. Each catalog lists
//! resources, and each resource offers one or more representations: an
//! element type sampled at a fixed period. A host browses the hierarchy,
//! then asks for a time window of several representations at once. The
//! read engine fills caller-owned buffers with one element and one status
//! byte per tick, reports progress, and stops early when cancelled.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Catalogs are validated at construction and immutable afterwards
//! - Reads write in place into caller buffers, sized `ceil(window / period)`
//! - Cancellation is observed between bounded chunks of work
//! - Progress is monotonic and ends at exactly `1.0` on success
//! - Optional remoting layer serving a host over TCP
//!
//! ## Quick Start
//!
//! ```rust
//! use strata::{CancellationToken, DataSource, PluginConfig, ReadBuffers, ResourcePath};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = PluginConfig::default().build_data_source()?;
//!
//! // Browse from the root.
//! let registrations = source.get_catalog_registrations("/")?;
//! assert_eq!(registrations[0].id.as_str(), "/A/B/C");
//!
//! // Resolve a representation.
//! let path = ResourcePath::parse("/A/B/C/resource1/1_s")?;
//! let catalog = source.get_catalog("/A/B/C")?;
//! let (_, representation) = catalog.resolve(&path)?;
//! let representation = representation.clone();
//!
//! // Read three seconds.
//! let begin = 1_700_000_000_000_000_000u64;
//! let end = begin + 3_000_000_000;
//! let mut buffers = ReadBuffers::allocate(begin, end, &representation)?;
//! source.read(
//!     begin,
//!     end,
//!     &mut [buffers.request(path, representation)],
//!     &|_| {},
//!     &CancellationToken::new(),
//! )?;
//!
//! assert_eq!(buffers.values_f64(), vec![0.0, 1.0, 2.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`CatalogRegistry`]: Static set of catalogs with listing and lookup
//! - [`ReadEngine`]: Chunked, cancellable window reads over a [`SampleSource`]
//! - [`DataSource`]: The host-facing call surface
//! - [`PluginConfig`]: JSON configuration building a complete data source
//!
//! ## Modules
//!
//! - [`catalog`]: Catalog identifiers, resources, resource paths
//! - [`representation`]: Element types and sampling periods
//! - [`registry`]: Registration listing, time ranges, availability
//! - [`window`]: Time windows and tick arithmetic
//! - [`source`]: Sample sources
//! - [`read`]: The read engine
//! - [`cancel`]: Cancellation tokens
//! - [`data_source`]: Data source trait and context
//! - [`config`]: Configuration
//! - `protocol`, `communicator`: Host channel (feature `remoting`)
//! - [`error`]: Error types

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod data_source;
pub mod error;
pub mod read;
pub mod registry;
pub mod representation;
pub mod source;
pub mod window;

#[cfg(feature = "remoting")]
pub mod communicator;
#[cfg(feature = "remoting")]
pub mod protocol;

// Re-export primary API types at crate root for convenience.
pub use cancel::CancellationToken;
pub use catalog::{CatalogId, CatalogRegistration, Resource, ResourceCatalog, ResourcePath};
#[cfg(feature = "remoting")]
pub use communicator::RemoteCommunicator;
pub use config::PluginConfig;
pub use data_source::{CatalogDataSource, DataSource, DataSourceContext};
pub use error::{Result, StrataError};
pub use read::{ReadBuffers, ReadEngine, ReadOptions, ReadRequest};
pub use registry::{CatalogEntry, CatalogRegistry};
pub use representation::{DataType, Representation};
pub use source::SampleSource;
pub use window::TimeRange;
