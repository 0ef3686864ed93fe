//! Length-prefixed framing shared by both ends of a pipe.
//!
//! Every message is `length (u32, big-endian) ‖ payload`, with the payload
//! a JSON-serialized record. Reads honour the stream's configured read
//! timeout and surface it as [`CodecError::Timeout`] so bounded waits are
//! first-class at call sites.

use std::io;
use std::io::Read;
use std::io::Write;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Upper bound on a single frame. A length prefix beyond this is treated
/// as stream corruption rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    /// No frame arrived within the stream's read timeout.
    #[error("pipe read timed out")]
    Timeout,

    /// The peer closed the pipe.
    #[error("pipe closed")]
    Closed,

    /// The length prefix exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversize(usize),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CodecError::Timeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => CodecError::Closed,
            _ => CodecError::Io(err),
        }
    }
}

/// Write one frame. Flushes so the peer's blocking read can make progress.
pub fn send_frame(writer: &mut impl Write, payload: &[u8]) -> Result<(), CodecError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversize(payload.len()));
    }
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// A timeout that fires mid-frame leaves the stream unusable for further
/// framing; callers that hit [`CodecError::Timeout`] on a bounded read are
/// expected to discard the connection, which is what the pool does when it
/// destroys a worker.
pub fn recv_frame(reader: &mut impl Read) -> Result<Vec<u8>, CodecError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Oversize(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Serialize a record and send it as one frame.
pub fn send_record<T: Serialize>(writer: &mut impl Write, record: &T) -> Result<(), CodecError> {
    let payload = serde_json::to_vec(record)?;
    send_frame(writer, &payload)
}

/// Receive one frame and deserialize it.
pub fn recv_record<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, CodecError> {
    let payload = recv_frame(reader)?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
#[path = "codec.test.rs"]
mod tests;
