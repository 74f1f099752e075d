//! Sample sources: the representation-specific computation behind a read.
//!
//! The read engine splits every request into chunks of bounded size and
//! hands each chunk to a [`SampleSource`]. A source fills one element and
//! one status byte per tick of the chunk. It never sees the whole buffer,
//! so the engine can check cancellation and report progress between chunks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::ResourcePath;
use crate::error::{BoxError, CatalogError};
use crate::representation::Representation;
use crate::window::{TimeRange, tick_timestamp};

/// Status byte for a tick without data.
pub const STATUS_NO_DATA: u8 = 0;

/// Status byte for a tick with data.
pub const STATUS_AVAILABLE: u8 = 1;

/// A contiguous run of ticks of one read request.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Address of the request being read.
    pub path: &'a ResourcePath,
    /// Representation of the request.
    pub representation: &'a Representation,
    /// Begin of the whole read window in nanoseconds.
    pub window_begin: u64,
    /// Sampling period in nanoseconds.
    pub period_nanos: u64,
    /// Index of the first tick of this chunk within the window.
    pub first_tick: u64,
    /// Number of ticks in this chunk.
    pub len: usize,
}

impl Chunk<'_> {
    /// Returns the window-relative index of the tick at `offset` in this chunk.
    pub fn tick_index(&self, offset: usize) -> u64 {
        self.first_tick + offset as u64
    }

    /// Returns the absolute timestamp of the tick at `offset` in this chunk.
    pub fn timestamp(&self, offset: usize) -> u64 {
        tick_timestamp(self.window_begin, self.period_nanos, self.tick_index(offset))
    }
}

/// Produces samples for chunks of a read request.
///
/// `data` holds exactly `chunk.len` elements of the representation's data
/// type and `status` exactly `chunk.len` bytes. Implementations must write
/// every element and every status byte; stale bytes from a previous read
/// must not leak through.
pub trait SampleSource: Send + Sync {
    /// Fills `data` and `status` for the ticks of `chunk`.
    ///
    /// # Errors
    ///
    /// Returns the source's own error. The engine surfaces it unchanged as
    /// the source of [`ReadError::Computation`](crate::error::ReadError::Computation).
    fn read_chunk(&self, chunk: &Chunk<'_>, data: &mut [u8], status: &mut [u8])
    -> Result<(), BoxError>;
}

impl<S: SampleSource + ?Sized> SampleSource for Arc<S> {
    fn read_chunk(
        &self,
        chunk: &Chunk<'_>,
        data: &mut [u8],
        status: &mut [u8],
    ) -> Result<(), BoxError> {
        (**self).read_chunk(chunk, data, status)
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_chunk(
        &self,
        chunk: &Chunk<'_>,
        data: &mut [u8],
        status: &mut [u8],
    ) -> Result<(), BoxError> {
        (**self).read_chunk(chunk, data, status)
    }
}

/// Reference source filling every tick with its index within the window.
///
/// Ticks inside the coverage range get the index as value and status `1`.
/// Ticks outside get zeroed bytes and status `0`. With the default
/// unbounded coverage every tick is available.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use strata::catalog::ResourcePath;
/// use strata::representation::{DataType, Representation};
/// use strata::source::{Chunk, SampleSource, TickIndexSource};
///
/// let path = ResourcePath::parse("/A/B/C/resource1/1_s").unwrap();
/// let representation = Representation::new(DataType::Float64, Duration::from_secs(1)).unwrap();
/// let chunk = Chunk {
///     path: &path,
///     representation: &representation,
///     window_begin: 0,
///     period_nanos: 1_000_000_000,
///     first_tick: 0,
///     len: 3,
/// };
///
/// let mut data = [0u8; 24];
/// let mut status = [0u8; 3];
/// TickIndexSource::new().read_chunk(&chunk, &mut data, &mut status).unwrap();
///
/// assert_eq!(f64::from_le_bytes(data[16..24].try_into().unwrap()), 2.0);
/// assert_eq!(status, [1, 1, 1]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickIndexSource {
    coverage: TimeRange,
}

impl TickIndexSource {
    /// Creates a source with unbounded coverage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source that only has data within `coverage`.
    pub fn with_coverage(coverage: TimeRange) -> Self {
        Self { coverage }
    }

    /// Returns the coverage range.
    pub fn coverage(&self) -> TimeRange {
        self.coverage
    }
}

impl SampleSource for TickIndexSource {
    #[allow(clippy::cast_precision_loss)] // tick indices beyond 2^53 are not meaningful
    fn read_chunk(
        &self,
        chunk: &Chunk<'_>,
        data: &mut [u8],
        status: &mut [u8],
    ) -> Result<(), BoxError> {
        let data_type = chunk.representation.data_type;

        for (offset, (element, flag)) in data
            .chunks_exact_mut(data_type.size())
            .zip(status.iter_mut())
            .enumerate()
        {
            if self.coverage.contains(chunk.timestamp(offset)) {
                data_type.encode_into(chunk.tick_index(offset) as f64, element);
                *flag = STATUS_AVAILABLE;
            } else {
                element.fill(0);
                *flag = STATUS_NO_DATA;
            }
        }

        Ok(())
    }
}

/// Dispatches chunks to per-catalog sources.
///
/// Chunks of catalogs without a dedicated source go to the fallback, or
/// fail with [`CatalogError::UnknownCatalog`] if none is set.
#[derive(Clone, Default)]
pub struct SourceMap {
    sources: HashMap<String, Arc<dyn SampleSource>>,
    fallback: Option<Arc<dyn SampleSource>>,
}

impl SourceMap {
    /// Creates an empty map without fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes chunks of `catalog_id` to `source`.
    pub fn insert(&mut self, catalog_id: impl Into<String>, source: Arc<dyn SampleSource>) {
        self.sources.insert(catalog_id.into(), source);
    }

    /// Sets the source used for catalogs without a dedicated entry.
    pub fn with_fallback(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    /// Returns the number of dedicated entries.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if there are no dedicated entries.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut catalogs: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        catalogs.sort_unstable();
        f.debug_struct("SourceMap")
            .field("catalogs", &catalogs)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl SampleSource for SourceMap {
    fn read_chunk(
        &self,
        chunk: &Chunk<'_>,
        data: &mut [u8],
        status: &mut [u8],
    ) -> Result<(), BoxError> {
        let catalog_id = chunk.path.catalog_id.as_str();
        let source = self
            .sources
            .get(catalog_id)
            .or(self.fallback.as_ref())
            .ok_or_else(|| CatalogError::UnknownCatalog {
                id: catalog_id.to_string(),
            })?;
        source.read_chunk(chunk, data, status)
    }
}
