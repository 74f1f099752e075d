//! Error types for the strata data source plugin.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`SampleSource`](crate::source::SampleSource).
///
/// Kept as the `#[source]` of [`ReadError::Computation`] so the caller can
/// downcast to the source's concrete error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for all strata operations.
///
/// Each variant wraps the error enum of one concern. Use
/// [`is_cancelled`](StrataError::is_cancelled) and
/// [`is_retryable`](StrataError::is_retryable) to classify an error without
/// matching on the nested enums.
#[derive(Error, Debug)]
pub enum StrataError {
    /// Error resolving or validating a catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error during a windowed read.
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error on the host channel.
    #[cfg(feature = "remoting")]
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl StrataError {
    /// Returns `true` if the operation stopped because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Read(ReadError::Cancelled { .. }))
    }

    /// Returns `true` if re-issuing the same call may succeed.
    ///
    /// Unknown catalogs and invalid windows are caller errors and never
    /// retryable. Cancellation and computation failures are left to the
    /// caller's retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Catalog(_) | Self::Config(_) => false,
            Self::Read(e) => matches!(
                e,
                ReadError::Cancelled { .. } | ReadError::Computation { .. }
            ),
            #[cfg(feature = "remoting")]
            Self::Transport(_) => true,
        }
    }
}

/// Errors raised by catalog construction and lookup.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog identifier is not registered.
    #[error("unknown catalog '{id}'")]
    UnknownCatalog {
        /// The identifier that was looked up.
        id: String,
    },

    /// A catalog identifier is malformed.
    #[error("invalid catalog identifier '{id}': {reason}")]
    InvalidCatalogId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A resource identifier is malformed.
    #[error("invalid resource identifier '{id}': {reason}")]
    InvalidResourceId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two resources in one catalog share a name.
    #[error("catalog '{catalog}' contains resource '{resource}' more than once")]
    DuplicateResource {
        /// The owning catalog.
        catalog: String,
        /// The duplicated resource name.
        resource: String,
    },

    /// Two registered catalogs share an identifier.
    #[error("catalog '{id}' is registered more than once")]
    DuplicateCatalog {
        /// The duplicated identifier.
        id: String,
    },

    /// A resource was declared without any representation.
    #[error("resource '{resource}' has no representations")]
    NoRepresentations {
        /// The offending resource.
        resource: String,
    },

    /// A representation was declared with a zero sampling period.
    #[error("resource '{resource}' has a representation with zero sampling period")]
    ZeroSamplingPeriod {
        /// The offending resource.
        resource: String,
    },

    /// A sampling period does not fit into `u64` nanoseconds.
    #[error("sampling period {period:?} is too large")]
    SamplingPeriodTooLarge {
        /// The rejected period.
        period: Duration,
    },

    /// A resource path could not be parsed or resolved.
    #[error("invalid resource path '{path}': {reason}")]
    InvalidResourcePath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A catalog time range has `begin > end`.
    #[error("invalid time range for catalog '{id}': begin {begin} > end {end}")]
    InvalidTimeRange {
        /// The owning catalog.
        id: String,
        /// Range begin in nanoseconds.
        begin: u64,
        /// Range end in nanoseconds.
        end: u64,
    },

    /// The data source context was rejected.
    #[error("invalid data source context: {reason}")]
    InvalidContext {
        /// Why the context was rejected.
        reason: String,
    },
}

/// Errors raised by the windowed read engine.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The requested window is empty or reversed.
    #[error("invalid window: begin {begin} >= end {end}")]
    InvalidWindow {
        /// Window begin in nanoseconds.
        begin: u64,
        /// Window end in nanoseconds.
        end: u64,
    },

    /// A caller buffer does not match the expected sample count.
    #[error("request {index}: {buffer} buffer has {actual} bytes, expected {expected}")]
    BufferSizeMismatch {
        /// Position of the request in the batch.
        index: usize,
        /// Which buffer is wrong ("data" or "status").
        buffer: &'static str,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// The window holds more samples than can be addressed in memory.
    #[error("request {index}: window of {samples} samples does not fit in memory")]
    WindowTooLarge {
        /// Position of the request in the batch.
        index: usize,
        /// Number of ticks in the window.
        samples: u64,
    },

    /// The buffers of a whole batch exceed the configured limit.
    #[error("batch of {requests} requests needs {bytes} buffer bytes, limit is {limit}")]
    BatchTooLarge {
        /// Number of requests in the batch.
        requests: usize,
        /// Data and status bytes the batch needs.
        bytes: u64,
        /// The configured limit.
        limit: u64,
    },

    /// The read was cancelled before completion.
    #[error("read cancelled after {completed} of {total} samples")]
    Cancelled {
        /// Samples fully written before cancellation was observed.
        completed: u64,
        /// Total samples in the batch.
        total: u64,
    },

    /// A sample source failed while producing samples.
    #[error("request {index} ({path}): {source}")]
    Computation {
        /// Position of the request in the batch.
        index: usize,
        /// Resource path of the failing request.
        path: String,
        /// The source's own error.
        #[source]
        source: BoxError,
    },
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`PluginConfig`](crate::config::PluginConfig).
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Errors raised on the host channel.
#[cfg(feature = "remoting")]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connecting to the host failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// The host address.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the channel failed.
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the configured limit.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// The announced frame length.
        length: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A message could not be encoded or decoded.
    #[error("malformed message: {0}")]
    Message(#[from] serde_json::Error),

    /// The peer violated the protocol.
    #[error("protocol violation: {reason}")]
    Protocol {
        /// Description of the violation.
        reason: String,
    },

    /// The connection already runs its maximum number of reads.
    #[error("{limit} reads already in flight")]
    TooManyReads {
        /// The configured limit.
        limit: usize,
    },

    /// A blocking read task panicked or was aborted.
    #[error("read task failed: {reason}")]
    TaskFailed {
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let unknown: StrataError = CatalogError::UnknownCatalog {
            id: "/unknown".to_string(),
        }
        .into();
        assert!(!unknown.is_cancelled());
        assert!(!unknown.is_retryable());

        let cancelled: StrataError = ReadError::Cancelled {
            completed: 1,
            total: 3,
        }
        .into();
        assert!(cancelled.is_cancelled());
        assert!(cancelled.is_retryable());

        let window: StrataError = ReadError::InvalidWindow { begin: 5, end: 5 }.into();
        assert!(!window.is_retryable());
    }

    #[test]
    fn test_computation_keeps_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::TimedOut, "backend timed out");
        let err: StrataError = ReadError::Computation {
            index: 0,
            path: "/A/B/C/resource1/1_s".to_string(),
            source: Box::new(inner),
        }
        .into();

        let StrataError::Read(ReadError::Computation { source, .. }) = &err else {
            panic!("expected computation error");
        };
        let io = source
            .downcast_ref::<std::io::Error>()
            .expect("source should downcast to io::Error");
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);
    }
}
