//! Wire protocol between a host and a plugin process.
//!
//! Every frame is a 4-byte big-endian length followed by the payload.
//! Control messages are JSON-RPC 2.0 objects. A successful `read` response
//! is followed by two binary frames per request: the data buffer, then the
//! status buffer, in request order.
//!
//! | Method                     | Direction     | Params                                  |
//! |----------------------------|---------------|-----------------------------------------|
//! | `setContext`               | host → plugin | [`DataSourceContext`]                   |
//! | `getCatalogRegistrations`  | host → plugin | `{ path }`                              |
//! | `getCatalog`               | host → plugin | `{ catalogId }`                         |
//! | `getTimeRange`             | host → plugin | `{ catalogId }`                         |
//! | `getAvailability`          | host → plugin | `{ catalogId, begin, end }`             |
//! | `read`                     | host → plugin | `{ begin, end, requests: [{ path, representation }] }` |
//! | `cancel` (notification)    | host → plugin | `{ id }`                                |
//! | `progress` (notification)  | plugin → host | `{ id, progress }`                      |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::catalog::ResourcePath;
use crate::data_source::DataSourceContext;
use crate::error::{CatalogError, ReadError, StrataError, TransportError};
use crate::representation::Representation;

/// Protocol version carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The message is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The method parameters are invalid.
pub const INVALID_PARAMS: i64 = -32602;
/// The data source rejected the call.
pub const APPLICATION_ERROR: i64 = -32000;

/// Size of the frame length prefix.
const HEADER_LEN: usize = 4;

/// Writes one length-prefixed frame.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if `payload` exceeds `limit`
/// or the prefix range, and [`TransportError::Io`] on write failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], limit: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let too_large = || TransportError::FrameTooLarge {
        length: payload.len(),
        limit,
    };
    if payload.len() > limit {
        return Err(too_large());
    }
    let length = u32::try_from(payload.len()).map_err(|_| too_large())?;

    writer.write_all(&length.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` if the peer closed the connection between frames.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if the announced length
/// exceeds `limit`, [`TransportError::Protocol`] if the connection closes
/// inside a frame header, and [`TransportError::Io`] on read failure.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::Protocol {
                reason: "connection closed inside frame header".to_string(),
            });
        }
        filled += n;
    }

    let length = u32::from_be_bytes(header) as usize;
    if length > limit {
        return Err(TransportError::FrameTooLarge { length, limit });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// A call or notification. Notifications carry no `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always [`JSONRPC_VERSION`].
    #[serde(default)]
    pub jsonrpc: String,
    /// Call identifier, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Creates a call expecting a response.
    pub fn call(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Creates a notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Progress notification for the read call `id`.
    pub fn progress(id: u64, progress: f64) -> Self {
        Self::notification("progress", serde_json::json!({ "id": id, "progress": progress }))
    }
}

/// The answer to a call. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Identifier of the answered call, `null` if it could not be read.
    pub id: Option<u64>,
    /// Call result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Call failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Creates a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn failure(id: Option<u64>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Error classes a host can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The catalog identifier is not registered.
    UnknownCatalog,
    /// The read window is empty or reversed.
    InvalidWindow,
    /// The read was cancelled.
    Cancelled,
    /// The data source failed while computing samples.
    Computation,
    /// Anything else the caller got wrong.
    InvalidRequest,
}

/// Machine-readable error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error class.
    pub kind: ErrorKind,
    /// Whether re-issuing the call may succeed.
    pub retryable: bool,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Error class and retry hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl RpcError {
    fn caller(code: i64, message: String) -> Self {
        Self {
            code,
            message,
            data: Some(ErrorData {
                kind: ErrorKind::InvalidRequest,
                retryable: false,
            }),
        }
    }

    /// The payload was not valid JSON.
    pub fn parse_error(error: &serde_json::Error) -> Self {
        Self::caller(PARSE_ERROR, format!("parse error: {error}"))
    }

    /// The payload was JSON but not a request.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::caller(INVALID_REQUEST, reason.into())
    }

    /// The method is unknown.
    pub fn method_not_found(method: &str) -> Self {
        Self::caller(METHOD_NOT_FOUND, format!("method '{method}' not found"))
    }

    /// The parameters do not match the method.
    pub fn invalid_params(method: &str, error: &serde_json::Error) -> Self {
        Self::caller(INVALID_PARAMS, format!("invalid params for '{method}': {error}"))
    }

    /// Returns the error class, if known.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.data.map(|d| d.kind)
    }
}

impl From<&StrataError> for RpcError {
    fn from(error: &StrataError) -> Self {
        let kind = match error {
            StrataError::Catalog(CatalogError::UnknownCatalog { .. }) => ErrorKind::UnknownCatalog,
            StrataError::Read(
                ReadError::InvalidWindow { .. }
                | ReadError::BufferSizeMismatch { .. }
                | ReadError::WindowTooLarge { .. }
                | ReadError::BatchTooLarge { .. },
            ) => ErrorKind::InvalidWindow,
            StrataError::Read(ReadError::Cancelled { .. }) => ErrorKind::Cancelled,
            StrataError::Read(ReadError::Computation { .. }) => ErrorKind::Computation,
            _ => ErrorKind::InvalidRequest,
        };

        Self {
            code: APPLICATION_ERROR,
            message: error.to_string(),
            data: Some(ErrorData {
                kind,
                retryable: error.is_retryable(),
            }),
        }
    }
}

/// Params of calls addressing one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogParams {
    /// Catalog identifier.
    pub catalog_id: String,
}

/// Params of `getCatalogRegistrations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Parent path.
    pub path: String,
}

/// Params of `getAvailability`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    /// Catalog identifier.
    pub catalog_id: String,
    /// Window begin in nanoseconds since the Unix epoch.
    pub begin: u64,
    /// Window end in nanoseconds since the Unix epoch.
    pub end: u64,
}

/// One representation requested by `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequestParams {
    /// Address of the representation.
    pub path: ResourcePath,
    /// Element type and sampling period.
    pub representation: Representation,
}

/// Params of `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadParams {
    /// Window begin in nanoseconds since the Unix epoch.
    pub begin: u64,
    /// Window end in nanoseconds since the Unix epoch.
    pub end: u64,
    /// Requests filled in one pass.
    pub requests: Vec<ReadRequestParams>,
}

/// Params of the `cancel` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    /// Identifier of the read call to cancel.
    pub id: u64,
}

/// Layout of the binary frames following a `read` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResultEntry {
    /// Address of the representation.
    pub path: String,
    /// Number of ticks in the window.
    pub sample_count: usize,
    /// Byte length of the data frame.
    pub data_length: usize,
    /// Byte length of the status frame.
    pub status_length: usize,
}

/// Result of `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResult {
    /// One entry per request, in request order.
    pub requests: Vec<ReadResultEntry>,
}

/// A decoded host message.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `setContext`.
    SetContext(DataSourceContext),
    /// `getCatalogRegistrations`.
    GetCatalogRegistrations(RegistrationParams),
    /// `getCatalog`.
    GetCatalog(CatalogParams),
    /// `getTimeRange`.
    GetTimeRange(CatalogParams),
    /// `getAvailability`.
    GetAvailability(AvailabilityParams),
    /// `read`.
    Read(ReadParams),
    /// `cancel` notification.
    Cancel(CancelParams),
}

impl Call {
    /// Decodes a method and its params.
    ///
    /// # Errors
    ///
    /// Returns a [`METHOD_NOT_FOUND`] or [`INVALID_PARAMS`] error object.
    pub fn parse(method: &str, params: Value) -> Result<Self, RpcError> {
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params
        };

        Ok(match method {
            "setContext" => Self::SetContext(decode(method, params)?),
            "getCatalogRegistrations" => Self::GetCatalogRegistrations(decode(method, params)?),
            "getCatalog" => Self::GetCatalog(decode(method, params)?),
            "getTimeRange" => Self::GetTimeRange(decode(method, params)?),
            "getAvailability" => Self::GetAvailability(decode(method, params)?),
            "read" => Self::Read(decode(method, params)?),
            "cancel" => Self::Cancel(decode(method, params)?),
            other => return Err(RpcError::method_not_found(other)),
        })
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(method, &e))
}

/// Serializes a message into a frame payload.
///
/// # Errors
///
/// Returns [`TransportError::Message`] if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(message)?)
}
