//! Connection loop serving a [`DataSource`] to a remote host.
//!
//! The plugin connects to the host, then answers calls until the host
//! closes the connection. Catalog calls are answered inline. Each `read`
//! runs on a blocking task with its own [`CancellationToken`], so several
//! reads can be in flight and a `cancel` notification reaches the right
//! one. All outgoing frames go through a single writer task; the frames of
//! one read response are queued as one batch and never interleave with
//! other messages.
//!
//! [`TransportOptions`] bound the work one connection can request: the
//! number of reads in flight and the buffer bytes of a single read. A read
//! whose progress can no longer be delivered is cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::TransportOptions;
use crate::data_source::DataSource;
use crate::error::{CatalogError, ReadError, Result, StrataError, TransportError};
use crate::protocol::{
    Call, JSONRPC_VERSION, ReadParams, ReadResult, ReadResultEntry, Request, Response, RpcError,
    encode, read_frame, write_frame,
};
use crate::read::{ReadBuffers, ReadRequest};
use crate::window::{sample_count, validate_window};

/// Frames queued for the writer task.
enum Outgoing {
    Frame(Vec<u8>),
    Batch(Vec<Vec<u8>>),
}

type Pending = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Serves a data source over a host connection.
#[derive(Debug)]
pub struct RemoteCommunicator<D> {
    data_source: Arc<D>,
    options: TransportOptions,
}

impl<D: DataSource + 'static> RemoteCommunicator<D> {
    /// Creates a communicator for `data_source`.
    pub fn new(data_source: Arc<D>, options: TransportOptions) -> Self {
        Self {
            data_source,
            options,
        }
    }

    /// Returns the served data source.
    pub fn data_source(&self) -> &Arc<D> {
        &self.data_source
    }

    /// Connects to the host at `address:port` and serves it until it
    /// disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the host is unreachable and
    /// any error of [`RemoteCommunicator::serve`].
    pub async fn connect(&self, address: &str, port: u16) -> Result<()> {
        let target = format!("{address}:{port}");
        info!(%target, "connecting to host");

        let stream = TcpStream::connect(&target)
            .await
            .map_err(|source| TransportError::Connect {
                address: target.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(TransportError::from)?;

        info!(%target, "connected");
        self.serve(stream).await
    }

    /// Serves calls arriving on `stream` until the peer closes it.
    ///
    /// On return, every in-flight read has been cancelled and joined and
    /// every queued frame has been written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the channel fails or the peer sends an
    /// oversized or truncated frame.
    pub async fn serve<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let limit = self.options.max_frame_bytes;
        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, rx, limit));

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let mut reads = JoinSet::new();

        let outcome = loop {
            let frame = match read_frame(&mut reader, limit).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(TransportError::Io(e)) if is_disconnect(&e) => {
                    debug!("host reset the connection: {e}");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            while let Some(joined) = reads.try_join_next() {
                if let Err(e) = joined {
                    warn!("read task failed: {e}");
                }
            }

            self.dispatch(&frame, &tx, &pending, &mut reads);
        };

        debug!(in_flight = reads.len(), "host channel closed, shutting down");
        {
            let tokens = pending.lock().unwrap_or_else(PoisonError::into_inner);
            tokens.values().for_each(CancellationToken::cancel);
        }
        while let Some(joined) = reads.join_next().await {
            if let Err(e) = joined {
                warn!("read task failed: {e}");
            }
        }

        drop(tx);
        let written = writer_task.await.map_err(|e| TransportError::TaskFailed {
            reason: e.to_string(),
        })?;

        outcome?;
        match written {
            // The host may close its end before the last frames are flushed.
            Err(TransportError::Io(e)) if is_disconnect(&e) => Ok(()),
            other => Ok(other?),
        }
    }

    fn dispatch(
        &self,
        frame: &[u8],
        tx: &mpsc::UnboundedSender<Outgoing>,
        pending: &Pending,
        reads: &mut JoinSet<()>,
    ) {
        let request: Request = match serde_json::from_slice(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed message: {e}");
                send(tx, &Response::failure(None, RpcError::parse_error(&e)));
                return;
            }
        };

        let id = request.id;
        if request.jsonrpc != JSONRPC_VERSION {
            send(
                tx,
                &Response::failure(
                    id,
                    RpcError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
                ),
            );
            return;
        }

        let call = match Call::parse(&request.method, request.params) {
            Ok(call) => call,
            Err(error) => {
                warn!(method = %request.method, "rejected call: {}", error.message);
                if id.is_some() {
                    send(tx, &Response::failure(id, error));
                }
                return;
            }
        };

        match (call, id) {
            (Call::Cancel(params), _) => {
                let tokens = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match tokens.get(&params.id) {
                    Some(token) => {
                        debug!(id = params.id, "cancelling read");
                        token.cancel();
                    }
                    None => debug!(id = params.id, "cancel for unknown or finished read"),
                }
            }
            (Call::Read(params), Some(id)) => self.spawn_read(id, params, tx, pending, reads),
            (call, Some(id)) => {
                let response = match self.answer(call) {
                    Ok(result) => Response::success(id, result),
                    Err(e) => {
                        debug!(id, "call failed: {e}");
                        Response::failure(Some(id), RpcError::from(&e))
                    }
                };
                send(tx, &response);
            }
            (_, None) => warn!(method = %request.method, "call without id ignored"),
        }
    }

    /// Answers a catalog call.
    fn answer(&self, call: Call) -> Result<Value> {
        let source = &self.data_source;
        let value = match call {
            Call::SetContext(context) => {
                source.set_context(context)?;
                Value::Null
            }
            Call::GetCatalogRegistrations(params) => {
                to_value(&source.get_catalog_registrations(&params.path)?)?
            }
            Call::GetCatalog(params) => to_value(&source.get_catalog(&params.catalog_id)?)?,
            Call::GetTimeRange(params) => to_value(&source.get_time_range(&params.catalog_id)?)?,
            Call::GetAvailability(params) => to_value(&source.get_availability(
                &params.catalog_id,
                params.begin,
                params.end,
            )?)?,
            Call::Read(_) | Call::Cancel(_) => {
                return Err(TransportError::Protocol {
                    reason: "read and cancel are not inline calls".to_string(),
                }
                .into());
            }
        };
        Ok(value)
    }

    fn spawn_read(
        &self,
        id: u64,
        params: ReadParams,
        tx: &mpsc::UnboundedSender<Outgoing>,
        pending: &Pending,
        reads: &mut JoinSet<()>,
    ) {
        let token = CancellationToken::new();
        {
            let mut tokens = pending.lock().unwrap_or_else(PoisonError::into_inner);
            let limit = self.options.max_concurrent_reads;
            if tokens.len() >= limit {
                warn!(id, in_flight = tokens.len(), "read rejected");
                let error = StrataError::from(TransportError::TooManyReads { limit });
                send(tx, &Response::failure(Some(id), RpcError::from(&error)));
                return;
            }
            tokens.insert(id, token.clone());
        }

        let source = Arc::clone(&self.data_source);
        let tx = tx.clone();
        let pending = Arc::clone(pending);
        let options = self.options;

        debug!(id, requests = params.requests.len(), begin = params.begin, end = params.end, "read");
        reads.spawn_blocking(move || {
            let outcome = execute_read(source.as_ref(), id, &params, &token, &tx, &options);
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            let outgoing = match outcome {
                Ok(frames) => Outgoing::Batch(frames),
                Err(e) => {
                    if e.is_cancelled() {
                        info!(id, "read cancelled");
                    } else {
                        warn!(id, "read failed: {e}");
                    }
                    match encode(&Response::failure(Some(id), RpcError::from(&e))) {
                        Ok(frame) => Outgoing::Frame(frame),
                        Err(e) => {
                            warn!(id, "failed to encode error response: {e}");
                            return;
                        }
                    }
                }
            };
            if tx.send(outgoing).is_err() {
                warn!(id, "writer is gone, read response dropped");
            }
        });
    }
}

/// Runs one read and returns the response frames.
fn execute_read<D: DataSource + ?Sized>(
    source: &D,
    id: u64,
    params: &ReadParams,
    token: &CancellationToken,
    tx: &mpsc::UnboundedSender<Outgoing>,
    options: &TransportOptions,
) -> Result<Vec<Vec<u8>>> {
    let (begin, end) = (params.begin, params.end);
    validate_window(begin, end)?;

    let mut batch_bytes = 0u64;
    for (index, request) in params.requests.iter().enumerate() {
        let representation_id = request.representation.id();
        if representation_id != request.path.representation_id {
            return Err(CatalogError::InvalidResourcePath {
                path: request.path.to_string(),
                reason: format!("representation is '{representation_id}'"),
            }
            .into());
        }

        let samples = sample_count(begin, end, request.representation.period_nanos()?);
        let data_len = samples.saturating_mul(request.representation.data_type.size() as u64);
        if data_len > options.max_frame_bytes as u64 {
            return Err(ReadError::WindowTooLarge { index, samples }.into());
        }
        batch_bytes = batch_bytes.saturating_add(data_len).saturating_add(samples);
    }
    if batch_bytes > options.max_read_bytes {
        return Err(ReadError::BatchTooLarge {
            requests: params.requests.len(),
            bytes: batch_bytes,
            limit: options.max_read_bytes,
        }
        .into());
    }

    let mut buffers = params
        .requests
        .iter()
        .map(|r| ReadBuffers::allocate(begin, end, &r.representation))
        .collect::<Result<Vec<_>>>()?;

    let mut requests: Vec<ReadRequest<'_>> = buffers
        .iter_mut()
        .zip(&params.requests)
        .map(|(b, r)| b.request(r.path.clone(), r.representation.clone()))
        .collect();

    let progress = |fraction: f64| {
        if let Ok(frame) = encode(&Request::progress(id, fraction))
            && tx.send(Outgoing::Frame(frame)).is_err()
            && !token.is_cancelled()
        {
            debug!(id, "writer is gone, cancelling read");
            token.cancel();
        }
    };
    source.read(begin, end, &mut requests, &progress, token)?;
    drop(requests);

    let result = ReadResult {
        requests: buffers
            .iter()
            .zip(&params.requests)
            .map(|(b, r)| ReadResultEntry {
                path: r.path.to_string(),
                sample_count: b.sample_count(),
                data_length: b.data.len(),
                status_length: b.status.len(),
            })
            .collect(),
    };

    let mut frames = Vec::with_capacity(1 + 2 * buffers.len());
    frames.push(encode(&Response::success(id, to_value(&result)?))?);
    for b in buffers {
        frames.push(b.data);
        frames.push(b.status);
    }
    Ok(frames)
}

async fn write_loop<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    limit: usize,
) -> std::result::Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Frame(frame) => write_frame(&mut writer, &frame, limit).await?,
            Outgoing::Batch(frames) => {
                for frame in &frames {
                    write_frame(&mut writer, frame, limit).await?;
                }
            }
        }
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<Outgoing>, message: &Response) {
    match encode(message) {
        Ok(frame) => {
            if tx.send(Outgoing::Frame(frame)).is_err() {
                warn!(id = ?message.id, "writer is gone, response dropped");
            }
        }
        Err(e) => warn!("failed to encode response: {e}"),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| StrataError::from(TransportError::from(e)))
}

fn is_disconnect(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected
    )
}
