//! Wire framing: 4-byte big-endian length prefix followed by a JSON payload.
//!
//! The transport must preserve message boundaries for the dispatch protocol;
//! the length prefix provides that over a raw byte stream. A corrupt prefix
//! loses stream sync and is reported as an I/O error so the connection layer
//! can tear the socket down, whereas a payload that fails JSON decode is a
//! per-frame problem the reader can log and drop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Maximum serialized frame size accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Width of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Engine command name.
    pub command: String,
    /// Command arguments, opaque to the dispatch layer.
    pub params: Value,
    /// Token echoed back in the matching response.
    pub correlation_id: u64,
}

/// Response disposition reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Command executed; `result` carries the payload.
    Success,
    /// Command rejected; `message` carries the reason.
    Error,
}

/// Inbound response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Success or error.
    pub status: ResponseStatus,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Token copied from the request this frame answers.
    pub correlation_id: u64,
}

impl ResponseFrame {
    /// Success frame carrying `result`.
    #[must_use]
    pub fn success(correlation_id: u64, result: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            result: Some(result),
            message: None,
            correlation_id,
        }
    }

    /// Error frame carrying `message`.
    #[must_use]
    pub fn error(correlation_id: u64, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            message: Some(message.into()),
            correlation_id,
        }
    }

    /// Decode the tagged status into a result, exactly once, at the
    /// connection boundary. Downstream code never re-inspects raw shape.
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Error => Err(ProtocolError::Engine {
                message: self
                    .message
                    .unwrap_or_else(|| "unspecified engine error".to_string()),
            }),
        }
    }
}

/// Serialize a frame with its length prefix.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(frame).map_err(|e| ProtocolError::Frame(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::Frame(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a response payload (without prefix).
pub fn decode_response(payload: &[u8]) -> Result<ResponseFrame, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Frame(e.to_string()))
}

/// Read one length-prefixed payload from the stream.
///
/// An over-limit length prefix means the stream is out of sync or the peer
/// is misbehaving; it is returned as `InvalidData` so the caller tears the
/// connection down.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds the {MAX_FRAME_SIZE} byte limit"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one already-encoded frame (prefix included) to the stream.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await
}
