//! The call surface a host uses to talk to a data source.
//!
//! [`DataSource`] mirrors the six host calls: set the context, list
//! registrations, fetch a catalog, its time range and availability, and
//! read a window. [`CatalogDataSource`] implements it over a static
//! [`CatalogRegistry`] and a [`ReadEngine`].

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::catalog::{CatalogRegistration, ResourceCatalog};
use crate::error::{CatalogError, Result};
use crate::read::{ReadEngine, ReadRequest};
use crate::registry::CatalogRegistry;
use crate::source::SampleSource;
use crate::window::TimeRange;

/// Startup context handed to a data source by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSourceContext {
    /// Location of the underlying data, e.g. `file:///var/data`.
    pub resource_locator: Option<String>,
    /// Source-specific settings.
    pub source_configuration: BTreeMap<String, serde_json::Value>,
    /// Settings of the current request scope.
    pub request_configuration: BTreeMap<String, serde_json::Value>,
}

impl DataSourceContext {
    /// Returns the URL scheme of the resource locator, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strata::data_source::DataSourceContext;
    ///
    /// let context = DataSourceContext {
    ///     resource_locator: Some("file:///var/data".to_string()),
    ///     ..Default::default()
    /// };
    /// assert_eq!(context.scheme(), Some("file"));
    /// ```
    pub fn scheme(&self) -> Option<&str> {
        self.resource_locator
            .as_deref()
            .and_then(|locator| locator.split_once(':'))
            .map(|(scheme, _)| scheme)
    }
}

/// A data source serving catalogs and windowed reads to a host.
///
/// All methods take `&self`; implementations are shared between the
/// connection loop and blocking read tasks.
pub trait DataSource: Send + Sync {
    /// Stores the startup context. Called once before any other call.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is unusable for this source.
    fn set_context(&self, context: DataSourceContext) -> Result<()>;

    /// Lists the catalogs directly below `path`. Unknown paths yield an
    /// empty list.
    ///
    /// # Errors
    ///
    /// Implementations backed by external systems may fail; the static
    /// [`CatalogDataSource`] never does.
    fn get_catalog_registrations(&self, path: &str) -> Result<Vec<CatalogRegistration>>;

    /// Returns the full schema of a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers.
    fn get_catalog(&self, catalog_id: &str) -> Result<ResourceCatalog>;

    /// Returns the overall coverage of a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers.
    fn get_time_range(&self, catalog_id: &str) -> Result<TimeRange>;

    /// Returns the fraction of `[begin, end)` the catalog can serve.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCatalog`] for unregistered identifiers.
    fn get_availability(&self, catalog_id: &str, begin: u64, end: u64) -> Result<f64>;

    /// Fills the requests' buffers for `[begin, end)`.
    ///
    /// # Errors
    ///
    /// See [`ReadEngine::read`].
    fn read(
        &self,
        begin: u64,
        end: u64,
        requests: &mut [ReadRequest<'_>],
        progress: &(dyn Fn(f64) + Sync),
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// [`DataSource`] over a static registry and a read engine.
#[derive(Debug)]
pub struct CatalogDataSource<S> {
    registry: Arc<CatalogRegistry>,
    engine: ReadEngine<S>,
    required_scheme: Option<String>,
    context: RwLock<Option<DataSourceContext>>,
}

impl<S: SampleSource> CatalogDataSource<S> {
    /// Creates a data source accepting any context.
    pub fn new(registry: Arc<CatalogRegistry>, engine: ReadEngine<S>) -> Self {
        Self {
            registry,
            engine,
            required_scheme: None,
            context: RwLock::new(None),
        }
    }

    /// Requires the context's resource locator to use `scheme`.
    pub fn with_required_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.required_scheme = Some(scheme.into());
        self
    }

    /// Returns the shared registry.
    pub fn registry(&self) -> &Arc<CatalogRegistry> {
        &self.registry
    }

    /// Returns the read engine.
    pub fn engine(&self) -> &ReadEngine<S> {
        &self.engine
    }

    /// Returns a copy of the context set by the host, if any.
    pub fn context(&self) -> Option<DataSourceContext> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<S: SampleSource> DataSource for CatalogDataSource<S> {
    fn set_context(&self, context: DataSourceContext) -> Result<()> {
        if let Some(required) = &self.required_scheme
            && context.scheme() != Some(required.as_str())
        {
            return Err(CatalogError::InvalidContext {
                reason: format!(
                    "expected '{required}' URI scheme, but got '{}'",
                    context.scheme().unwrap_or("")
                ),
            }
            .into());
        }

        info!(
            resource_locator = context.resource_locator.as_deref().unwrap_or(""),
            catalogs = self.registry.len(),
            "data source context set"
        );
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(context);
        Ok(())
    }

    fn get_catalog_registrations(&self, path: &str) -> Result<Vec<CatalogRegistration>> {
        Ok(self.registry.list_registrations(path))
    }

    fn get_catalog(&self, catalog_id: &str) -> Result<ResourceCatalog> {
        debug!(catalog_id, "get catalog");
        self.registry.get_catalog(catalog_id).cloned()
    }

    fn get_time_range(&self, catalog_id: &str) -> Result<TimeRange> {
        self.registry.get_time_range(catalog_id)
    }

    fn get_availability(&self, catalog_id: &str, begin: u64, end: u64) -> Result<f64> {
        self.registry.get_availability(catalog_id, begin, end)
    }

    fn read(
        &self,
        begin: u64,
        end: u64,
        requests: &mut [ReadRequest<'_>],
        progress: &(dyn Fn(f64) + Sync),
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.engine.read(begin, end, requests, progress, cancel)
    }
}
