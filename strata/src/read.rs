//! Windowed read engine writing samples into caller-owned buffers.
//!
//! A read names one `[begin, end)` window and a batch of [`ReadRequest`]s.
//! Each request borrows a data buffer of `sample_count × element_size`
//! bytes and a status buffer of `sample_count` bytes, where
//! `sample_count = ceil((end - begin) / period)`. The engine writes into
//! those slices in place and never resizes or keeps them.
//!
//! # Execution
//!
//! Requests are split into chunks of at most
//! [`ReadOptions::chunk_samples`] ticks. Before each chunk the engine checks
//! the [`CancellationToken`]; after each chunk it reports progress. Progress
//! is a fraction of all ticks in the batch and never decreases, even when
//! requests run in parallel. A cancellation raised while the last chunk is
//! computing still fails the read, and `1.0` is only reported once the read
//! has succeeded.
//!
//! Parallel reads use at most one thread per available CPU. Workers take
//! the next unstarted request from a shared queue.
//!
//! # Failure Semantics
//!
//! The first failing request aborts the read. Buffers already written stay
//! as they are: after an error, data and status bytes past the failure
//! point are unspecified.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use strata::cancel::CancellationToken;
//! use strata::catalog::ResourcePath;
//! use strata::read::{ReadBuffers, ReadEngine, ReadOptions};
//! use strata::representation::{DataType, Representation};
//! use strata::source::TickIndexSource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
//! let path = ResourcePath::parse("/A/B/C/resource1/1_s")?;
//! let representation = Representation::new(DataType::Float64, Duration::from_secs(1))?;
//!
//! let t0 = 1_700_000_000_000_000_000u64;
//! let t1 = t0 + 3_000_000_000;
//! let mut buffers = ReadBuffers::allocate(t0, t1, &representation)?;
//! let mut requests = [buffers.request(path, representation)];
//!
//! engine.read(t0, t1, &mut requests, |p| println!("{p:.0}%", p = p * 100.0), &CancellationToken::new())?;
//!
//! assert_eq!(buffers.values_f64(), vec![0.0, 1.0, 2.0]);
//! assert_eq!(buffers.status, vec![1, 1, 1]);
//! # Ok(())
//! # }
//! ```

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::catalog::ResourcePath;
use crate::error::{ConfigError, ReadError, Result};
use crate::representation::{DataType, Representation};
use crate::source::{Chunk, SampleSource};
use crate::window::{sample_count, validate_window};

/// Default number of ticks per chunk.
const DEFAULT_CHUNK_SAMPLES: usize = 64 * 1024;

/// Largest accepted number of ticks per chunk.
pub const MAX_CHUNK_SAMPLES: usize = 1 << 24;

/// Tuning options for the read engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Maximum ticks computed between two cancellation checks.
    pub chunk_samples: usize,

    /// Compute requests of one batch on parallel threads.
    pub parallel: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            parallel: false,
        }
    }
}

impl ReadOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `chunk_samples` is zero or
    /// larger than [`MAX_CHUNK_SAMPLES`].
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CHUNK_SAMPLES).contains(&self.chunk_samples) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "read.chunk_samples must be in 1..={MAX_CHUNK_SAMPLES}, got {}",
                    self.chunk_samples
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// One representation to read, with the caller's output buffers.
#[derive(Debug)]
pub struct ReadRequest<'a> {
    /// Address of the representation.
    pub path: ResourcePath,
    /// Element type and sampling period.
    pub representation: Representation,
    /// Output elements, `sample_count × element_size` bytes.
    pub data: &'a mut [u8],
    /// Output status bytes, one per tick.
    pub status: &'a mut [u8],
}

impl<'a> ReadRequest<'a> {
    /// Creates a new request over caller-owned buffers.
    pub fn new(
        path: ResourcePath,
        representation: Representation,
        data: &'a mut [u8],
        status: &'a mut [u8],
    ) -> Self {
        Self {
            path,
            representation,
            data,
            status,
        }
    }
}

/// Owned, correctly sized buffers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBuffers {
    /// Element type the data buffer is laid out for.
    pub data_type: DataType,
    /// Raw little-endian elements.
    pub data: Vec<u8>,
    /// One status byte per tick.
    pub status: Vec<u8>,
}

impl ReadBuffers {
    /// Allocates zeroed buffers for `representation` over `[begin, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::InvalidWindow`] if `begin >= end` and
    /// [`ReadError::WindowTooLarge`] if the buffers cannot be addressed.
    pub fn allocate(begin: u64, end: u64, representation: &Representation) -> Result<Self> {
        validate_window(begin, end)?;
        let (samples, data_len) = buffer_sizes(0, begin, end, representation)?;
        Ok(Self {
            data_type: representation.data_type,
            data: vec![0; data_len],
            status: vec![0; samples],
        })
    }

    /// Number of ticks these buffers hold.
    pub fn sample_count(&self) -> usize {
        self.status.len()
    }

    /// Borrows the buffers as a [`ReadRequest`].
    pub fn request(&mut self, path: ResourcePath, representation: Representation) -> ReadRequest<'_> {
        ReadRequest::new(path, representation, &mut self.data, &mut self.status)
    }

    /// Decodes the data buffer as `f64` values, whatever the element type.
    #[allow(clippy::cast_precision_loss)] // inspection helper
    pub fn values_f64(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.data_type.size())
            .map(|e| match self.data_type {
                DataType::Uint8 => f64::from(e[0]),
                DataType::Int8 => f64::from(i8::from_le_bytes([e[0]])),
                DataType::Uint16 => f64::from(u16::from_le_bytes([e[0], e[1]])),
                DataType::Int16 => f64::from(i16::from_le_bytes([e[0], e[1]])),
                DataType::Uint32 => f64::from(u32::from_le_bytes([e[0], e[1], e[2], e[3]])),
                DataType::Int32 => f64::from(i32::from_le_bytes([e[0], e[1], e[2], e[3]])),
                DataType::Float32 => f64::from(f32::from_le_bytes([e[0], e[1], e[2], e[3]])),
                DataType::Uint64 => u64::from_le_bytes(eight(e)) as f64,
                DataType::Int64 => i64::from_le_bytes(eight(e)) as f64,
                DataType::Float64 => f64::from_le_bytes(eight(e)),
            })
            .collect()
    }
}

fn eight(e: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(e);
    out
}

/// Returns `(sample_count, data_len)` for one request.
fn buffer_sizes(
    index: usize,
    begin: u64,
    end: u64,
    representation: &Representation,
) -> Result<(usize, usize)> {
    let samples = sample_count(begin, end, representation.period_nanos()?);
    let too_large = || ReadError::WindowTooLarge { index, samples };

    let sample_len = usize::try_from(samples).map_err(|_| too_large())?;
    let data_len = sample_len
        .checked_mul(representation.data_type.size())
        .ok_or_else(too_large)?;
    Ok((sample_len, data_len))
}

/// Serializes progress reports so the reported fraction never decreases.
struct ProgressTracker<'p, P> {
    total: u64,
    state: Mutex<ProgressState>,
    sink: &'p P,
}

struct ProgressState {
    completed: u64,
    reported: f64,
}

impl<'p, P: Fn(f64) + Sync> ProgressTracker<'p, P> {
    fn new(total: u64, sink: &'p P) -> Self {
        Self {
            total,
            state: Mutex::new(ProgressState {
                completed: 0,
                reported: 0.0,
            }),
            sink,
        }
    }

    fn completed(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
    }

    #[allow(clippy::cast_precision_loss)] // a ratio, precision loss is harmless
    fn advance(&self, samples: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.completed = (state.completed + samples).min(self.total);

        let fraction = if self.total == 0 {
            1.0
        } else {
            state.completed as f64 / self.total as f64
        };

        // 1.0 is left to `finish`, which only runs on success.
        if fraction > state.reported && fraction < 1.0 {
            state.reported = fraction;
            (self.sink)(fraction);
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.reported < 1.0 {
            state.reported = 1.0;
            (self.sink)(1.0);
        }
    }
}

/// Per-request plan computed during validation.
struct Plan {
    period_nanos: u64,
}

/// Computes windowed reads with a [`SampleSource`].
#[derive(Debug, Clone)]
pub struct ReadEngine<S> {
    source: S,
    options: ReadOptions,
}

impl<S: SampleSource> ReadEngine<S> {
    /// Creates an engine over `source`.
    pub fn new(source: S, options: ReadOptions) -> Self {
        Self { source, options }
    }

    /// Returns the engine options.
    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Returns the sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fills every request's buffers for the window `[begin, end)`.
    ///
    /// `progress` receives non-decreasing fractions in `(0, 1]`, ending
    /// with `1.0` on success. It is called while the engine holds its
    /// progress lock, so it must return quickly.
    ///
    /// # Errors
    ///
    /// - [`ReadError::InvalidWindow`] if `begin >= end`
    /// - [`CatalogError::ZeroSamplingPeriod`](crate::error::CatalogError::ZeroSamplingPeriod)
    ///   if a representation was built without validation
    /// - [`ReadError::BufferSizeMismatch`] if a buffer has the wrong length
    /// - [`ReadError::Cancelled`] if `cancel` was observed before completion
    /// - [`ReadError::Computation`] if the source failed for a request
    pub fn read<P>(
        &self,
        begin: u64,
        end: u64,
        requests: &mut [ReadRequest<'_>],
        progress: P,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        P: Fn(f64) + Sync,
    {
        validate_window(begin, end)?;
        let plans = Self::plan(begin, end, requests)?;

        let total: u64 = requests.iter().map(|r| r.status.len() as u64).sum();
        let tracker = ProgressTracker::new(total, &progress);

        debug!(
            begin,
            end,
            requests = requests.len(),
            total_samples = total,
            parallel = self.options.parallel,
            "starting read"
        );

        let outcome = if self.options.parallel && requests.len() > 1 {
            self.read_parallel(begin, requests, &plans, &tracker, cancel)
        } else {
            self.read_sequential(begin, requests, &plans, &tracker, cancel)
        };
        let outcome = outcome.and_then(|()| {
            if cancel.is_cancelled() {
                Err(ReadError::Cancelled {
                    completed: tracker.completed(),
                    total,
                })
            } else {
                Ok(())
            }
        });

        match outcome {
            Ok(()) => {
                tracker.finish();
                debug!(begin, end, total_samples = total, "read complete");
                Ok(())
            }
            Err(e @ ReadError::Cancelled { .. }) => {
                info!(begin, end, "read cancelled: {e}");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validates representations and buffer sizes against the window.
    fn plan(begin: u64, end: u64, requests: &[ReadRequest<'_>]) -> Result<Vec<Plan>> {
        requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                request.representation.validate(&request.path.resource_id)?;
                let (samples, data_len) = buffer_sizes(index, begin, end, &request.representation)?;

                if request.data.len() != data_len {
                    return Err(ReadError::BufferSizeMismatch {
                        index,
                        buffer: "data",
                        expected: data_len,
                        actual: request.data.len(),
                    }
                    .into());
                }
                if request.status.len() != samples {
                    return Err(ReadError::BufferSizeMismatch {
                        index,
                        buffer: "status",
                        expected: samples,
                        actual: request.status.len(),
                    }
                    .into());
                }

                Ok(Plan {
                    period_nanos: request.representation.period_nanos()?,
                })
            })
            .collect()
    }

    fn read_sequential<P: Fn(f64) + Sync>(
        &self,
        begin: u64,
        requests: &mut [ReadRequest<'_>],
        plans: &[Plan],
        tracker: &ProgressTracker<'_, P>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ReadError> {
        for (index, (request, plan)) in requests.iter_mut().zip(plans).enumerate() {
            self.read_one(index, begin, request, plan, tracker, &[cancel])?;
        }
        Ok(())
    }

    /// Scoped workers, at most one per CPU, draining a shared request
    /// queue. The first failure stops the others.
    fn read_parallel<P: Fn(f64) + Sync>(
        &self,
        begin: u64,
        requests: &mut [ReadRequest<'_>],
        plans: &[Plan],
        tracker: &ProgressTracker<'_, P>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ReadError> {
        let workers = parallel_workers(requests.len());
        let queue = Mutex::new(requests.iter_mut().zip(plans).enumerate());
        let abort = CancellationToken::new();
        let first_error: Mutex<Option<ReadError>> = Mutex::new(None);

        debug!(workers, requests = plans.len(), "parallel read");
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let (queue, abort, first_error) = (&queue, &abort, &first_error);
                scope.spawn(move || {
                    while !abort.is_cancelled() {
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                        let Some((index, (request, plan))) = next else {
                            break;
                        };
                        if let Err(e) = self.read_one(index, begin, request, plan, tracker, &[cancel, abort]) {
                            // Record before aborting so that workers stopped by the
                            // abort never win the slot.
                            let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            drop(slot);
                            abort.cancel();
                        }
                    }
                });
            }
        });

        match first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_one<P: Fn(f64) + Sync>(
        &self,
        index: usize,
        begin: u64,
        request: &mut ReadRequest<'_>,
        plan: &Plan,
        tracker: &ProgressTracker<'_, P>,
        stop: &[&CancellationToken],
    ) -> std::result::Result<(), ReadError> {
        let element_size = request.representation.data_type.size();
        let chunk_samples = self.options.chunk_samples.max(1);
        let mut first_tick = 0u64;

        // Saturation yields one chunk spanning both buffers.
        for (data, status) in request
            .data
            .chunks_mut(chunk_samples.saturating_mul(element_size))
            .zip(request.status.chunks_mut(chunk_samples))
        {
            if stop.iter().any(|token| token.is_cancelled()) {
                return Err(ReadError::Cancelled {
                    completed: tracker.completed(),
                    total: tracker.total,
                });
            }

            let chunk = Chunk {
                path: &request.path,
                representation: &request.representation,
                window_begin: begin,
                period_nanos: plan.period_nanos,
                first_tick,
                len: status.len(),
            };

            self.source
                .read_chunk(&chunk, data, status)
                .map_err(|source| ReadError::Computation {
                    index,
                    path: request.path.to_string(),
                    source,
                })?;

            first_tick += status.len() as u64;
            tracker.advance(status.len() as u64);
        }

        Ok(())
    }
}

/// Worker threads for a parallel read of `requests` requests.
fn parallel_workers(requests: usize) -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    requests.clamp(1, cpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, StrataError};
    use crate::source::TickIndexSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SECOND: u64 = 1_000_000_000;
    const T0: u64 = 1_700_000_000 * SECOND;

    fn float64_1s() -> Representation {
        Representation::new(DataType::Float64, Duration::from_secs(1)).unwrap()
    }

    fn path() -> ResourcePath {
        ResourcePath::parse("/A/B/C/resource1/1_s").unwrap()
    }

    /// Fails on the chunk containing `fail_at`.
    struct FailingSource {
        fail_at: u64,
    }

    impl SampleSource for FailingSource {
        fn read_chunk(
            &self,
            chunk: &Chunk<'_>,
            data: &mut [u8],
            status: &mut [u8],
        ) -> std::result::Result<(), BoxError> {
            let end = chunk.first_tick + chunk.len as u64;
            if (chunk.first_tick..end).contains(&self.fail_at) {
                return Err("sensor offline".into());
            }
            TickIndexSource::new().read_chunk(chunk, data, status)
        }
    }

    /// Counts chunks and cancels the token after `cancel_after` of them.
    struct CancellingSource {
        token: CancellationToken,
        cancel_after: usize,
        chunks: AtomicUsize,
    }

    impl SampleSource for CancellingSource {
        fn read_chunk(
            &self,
            chunk: &Chunk<'_>,
            data: &mut [u8],
            status: &mut [u8],
        ) -> std::result::Result<(), BoxError> {
            if self.chunks.fetch_add(1, Ordering::SeqCst) + 1 >= self.cancel_after {
                self.token.cancel();
            }
            TickIndexSource::new().read_chunk(chunk, data, status)
        }
    }

    #[test]
    fn test_reference_scenario() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let mut buffers = ReadBuffers::allocate(T0, T0 + 3 * SECOND, &float64_1s()).unwrap();

        let reports = Mutex::new(Vec::new());
        engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [buffers.request(path(), float64_1s())],
                |p| reports.lock().unwrap().push(p),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(buffers.sample_count(), 3);
        assert_eq!(buffers.values_f64(), vec![0.0, 1.0, 2.0]);
        assert_eq!(buffers.status, vec![1, 1, 1]);
        assert_eq!(reports.into_inner().unwrap().last().copied(), Some(1.0));
    }

    #[test]
    fn test_invalid_window() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let err = engine
            .read(T0, T0, &mut [], |_| {}, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StrataError::Read(ReadError::InvalidWindow { .. })));
        assert!(ReadBuffers::allocate(T0 + 1, T0, &float64_1s()).is_err());
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let mut data = vec![0u8; 16];
        let mut status = vec![0u8; 3];
        let err = engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [ReadRequest::new(path(), float64_1s(), &mut data, &mut status)],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Read(ReadError::BufferSizeMismatch {
                buffer: "data",
                expected: 24,
                actual: 16,
                ..
            })
        ));

        let mut data = vec![0u8; 24];
        let mut status = vec![0u8; 2];
        let err = engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [ReadRequest::new(path(), float64_1s(), &mut data, &mut status)],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Read(ReadError::BufferSizeMismatch { buffer: "status", .. })
        ));
    }

    #[test]
    fn test_cancelled_before_read_writes_nothing() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let mut buffers = ReadBuffers::allocate(T0, T0 + 3 * SECOND, &float64_1s()).unwrap();
        buffers.status.fill(0xAA);

        let token = CancellationToken::new();
        token.cancel();

        let err = engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [buffers.request(path(), float64_1s())],
                |_| {},
                &token,
            )
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(buffers.status, vec![0xAA; 3]);
    }

    #[test]
    fn test_cancellation_observed_between_chunks() {
        let token = CancellationToken::new();
        let source = CancellingSource {
            token: token.clone(),
            cancel_after: 2,
            chunks: AtomicUsize::new(0),
        };
        let options = ReadOptions {
            chunk_samples: 4,
            parallel: false,
        };
        let engine = ReadEngine::new(source, options);

        let mut buffers = ReadBuffers::allocate(T0, T0 + 20 * SECOND, &float64_1s()).unwrap();
        buffers.status.fill(0xAA);

        let err = engine
            .read(
                T0,
                T0 + 20 * SECOND,
                &mut [buffers.request(path(), float64_1s())],
                |_| {},
                &token,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            StrataError::Read(ReadError::Cancelled {
                completed: 8,
                total: 20
            })
        ));
        // Two chunks of four ticks were written, nothing after.
        assert_eq!(&buffers.status[..8], &[1; 8]);
        assert_eq!(&buffers.status[8..], &[0xAA; 12]);
        assert_eq!(engine.source().chunks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_computation_error_keeps_earlier_results() {
        let options = ReadOptions {
            chunk_samples: 2,
            parallel: false,
        };
        let engine = ReadEngine::new(FailingSource { fail_at: 3 }, options);

        let mut first = ReadBuffers::allocate(T0, T0 + 4 * SECOND, &float64_1s()).unwrap();
        let mut second = ReadBuffers::allocate(T0, T0 + 4 * SECOND, &float64_1s()).unwrap();

        let err = engine
            .read(
                T0,
                T0 + 4 * SECOND,
                &mut [
                    first.request(path(), float64_1s()),
                    second.request(path(), float64_1s()),
                ],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap_err();

        let StrataError::Read(ReadError::Computation { index, source, .. }) = err else {
            panic!("expected computation error");
        };
        assert_eq!(index, 0);
        assert_eq!(source.to_string(), "sensor offline");
        // First chunk of the failing request stays written, no rollback.
        assert_eq!(&first.status[..2], &[1, 1]);
        // The second request was never started.
        assert_eq!(second.status, vec![0; 4]);
    }

    #[test]
    fn test_progress_is_monotonic_and_complete() {
        let options = ReadOptions {
            chunk_samples: 3,
            parallel: false,
        };
        let engine = ReadEngine::new(TickIndexSource::new(), options);
        let mut a = ReadBuffers::allocate(T0, T0 + 10 * SECOND, &float64_1s()).unwrap();
        let int8 = Representation::new(DataType::Int8, Duration::from_millis(500)).unwrap();
        let mut b = ReadBuffers::allocate(T0, T0 + 10 * SECOND, &int8).unwrap();

        let reports = Mutex::new(Vec::new());
        engine
            .read(
                T0,
                T0 + 10 * SECOND,
                &mut [
                    a.request(path(), float64_1s()),
                    b.request(ResourcePath::parse("/A/B/C/resource2/500_ms").unwrap(), int8),
                ],
                |p| reports.lock().unwrap().push(p),
                &CancellationToken::new(),
            )
            .unwrap();

        let reports = reports.into_inner().unwrap();
        assert!(reports.windows(2).all(|w| w[0] <= w[1]), "{reports:?}");
        assert!(reports.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(reports.last().copied(), Some(1.0));
        assert_eq!(b.sample_count(), 20);
        assert_eq!(b.values_f64()[19], 19.0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let representations = [
            float64_1s(),
            Representation::new(DataType::Uint16, Duration::from_millis(250)).unwrap(),
            Representation::new(DataType::Int64, Duration::from_secs(2)).unwrap(),
        ];

        let run = |parallel: bool| {
            let engine = ReadEngine::new(
                TickIndexSource::new(),
                ReadOptions {
                    chunk_samples: 5,
                    parallel,
                },
            );
            let mut buffers: Vec<ReadBuffers> = representations
                .iter()
                .map(|r| ReadBuffers::allocate(T0, T0 + 30 * SECOND, r).unwrap())
                .collect();
            let mut requests: Vec<ReadRequest<'_>> = buffers
                .iter_mut()
                .zip(&representations)
                .map(|(b, r)| b.request(path(), r.clone()))
                .collect();

            let reports = Mutex::new(Vec::new());
            engine
                .read(
                    T0,
                    T0 + 30 * SECOND,
                    &mut requests,
                    |p| reports.lock().unwrap().push(p),
                    &CancellationToken::new(),
                )
                .unwrap();
            drop(requests);

            let reports = reports.into_inner().unwrap();
            assert!(reports.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(reports.last().copied(), Some(1.0));
            buffers
        };

        assert_eq!(run(true), run(false));
    }

    #[test]
    fn test_parallel_surfaces_computation_error() {
        let engine = ReadEngine::new(
            FailingSource { fail_at: 0 },
            ReadOptions {
                chunk_samples: 1,
                parallel: true,
            },
        );
        let mut a = ReadBuffers::allocate(T0, T0 + 4 * SECOND, &float64_1s()).unwrap();
        let mut b = ReadBuffers::allocate(T0, T0 + 4 * SECOND, &float64_1s()).unwrap();

        let err = engine
            .read(
                T0,
                T0 + 4 * SECOND,
                &mut [a.request(path(), float64_1s()), b.request(path(), float64_1s())],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(err, StrataError::Read(ReadError::Computation { .. })));
    }

    #[test]
    fn test_unvalidated_zero_period_is_rejected() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let zero = Representation {
            data_type: DataType::Float64,
            sampling_period: Duration::ZERO,
        };

        let err = engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [ReadRequest::new(path(), zero, &mut [], &mut [])],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            StrataError::Catalog(crate::error::CatalogError::ZeroSamplingPeriod { .. })
        ));
    }

    #[test]
    fn test_cancellation_during_last_chunk_fails_the_read() {
        let token = CancellationToken::new();
        let source = CancellingSource {
            token: token.clone(),
            cancel_after: 1,
            chunks: AtomicUsize::new(0),
        };
        let engine = ReadEngine::new(source, ReadOptions::default());
        let mut buffers = ReadBuffers::allocate(T0, T0 + 3 * SECOND, &float64_1s()).unwrap();

        let reports = Mutex::new(Vec::new());
        let err = engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [buffers.request(path(), float64_1s())],
                |p| reports.lock().unwrap().push(p),
                &token,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            StrataError::Read(ReadError::Cancelled {
                completed: 3,
                total: 3
            })
        ));
        assert_eq!(engine.source().chunks.load(Ordering::SeqCst), 1);
        // The only chunk completed the batch, but 1.0 is reserved for success.
        assert!(reports.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_chunk_samples_bounds() {
        assert!(ReadOptions::default().validate().is_ok());
        for chunk_samples in [0, MAX_CHUNK_SAMPLES + 1, 1 << 61] {
            let options = ReadOptions {
                chunk_samples,
                parallel: false,
            };
            assert!(matches!(
                options.validate(),
                Err(StrataError::Config(ConfigError::Invalid { .. }))
            ));
        }
    }

    #[test]
    fn test_oversized_chunk_reads_in_one_piece() {
        // Unvalidated options must not overflow the chunk byte length.
        let engine = ReadEngine::new(
            TickIndexSource::new(),
            ReadOptions {
                chunk_samples: 1 << 61,
                parallel: false,
            },
        );
        let mut buffers = ReadBuffers::allocate(T0, T0 + 3 * SECOND, &float64_1s()).unwrap();
        engine
            .read(
                T0,
                T0 + 3 * SECOND,
                &mut [buffers.request(path(), float64_1s())],
                |_| {},
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(buffers.values_f64(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_parallel_workers_are_bounded() {
        let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        assert_eq!(parallel_workers(1), 1);
        assert_eq!(parallel_workers(10_000), cpus);

        // More requests than workers still fills every buffer.
        let engine = ReadEngine::new(
            TickIndexSource::new(),
            ReadOptions {
                chunk_samples: 2,
                parallel: true,
            },
        );
        let mut buffers: Vec<ReadBuffers> = (0..cpus * 4 + 1)
            .map(|_| ReadBuffers::allocate(T0, T0 + 5 * SECOND, &float64_1s()).unwrap())
            .collect();
        let mut requests: Vec<ReadRequest<'_>> = buffers
            .iter_mut()
            .map(|b| b.request(path(), float64_1s()))
            .collect();
        engine
            .read(T0, T0 + 5 * SECOND, &mut requests, |_| {}, &CancellationToken::new())
            .unwrap();
        drop(requests);

        assert!(buffers.iter().all(|b| b.status == vec![1; 5]));
    }

    #[test]
    fn test_read_is_idempotent() {
        let engine = ReadEngine::new(TickIndexSource::new(), ReadOptions::default());
        let read = || {
            let mut buffers = ReadBuffers::allocate(T0, T0 + 7 * SECOND + 1, &float64_1s()).unwrap();
            engine
                .read(
                    T0,
                    T0 + 7 * SECOND + 1,
                    &mut [buffers.request(path(), float64_1s())],
                    |_| {},
                    &CancellationToken::new(),
                )
                .unwrap();
            buffers
        };

        let first = read();
        assert_eq!(first.sample_count(), 8);
        assert_eq!(first, read());
    }
}
