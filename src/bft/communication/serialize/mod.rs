//! Framed (de)serialization of protocol envelopes.
//!
//! Every frame on the wire is a 4-byte big-endian length prefix
//! followed by that many bytes of a `bincode`-encoded
//! `(Header, SystemMessage)` pair. `bincode` is a self-describing,
//! order-preserving encoding, equivalent in spirit to the reflective
//! encoding this wire format was adapted from.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bft::communication::message::{Header, SystemMessage};
use crate::bft::error::*;

/// Maximum accepted frame size, guarding against a peer (Byzantine or
/// otherwise) claiming an unreasonable length prefix.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Encodes `(header, message)` as a length-prefixed frame and writes
/// it to `writer`.
pub async fn write_frame<W>(writer: &mut W, header: &Header, message: &SystemMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(&(header, message)).simple(ErrorKind::CommunicationMessage)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))
        .wrapped(ErrorKind::CommunicationMessage)?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame from `reader` and decodes it.
///
/// Returns `Ok(None)` on a clean end-of-stream (no bytes read at all),
/// matching the "reader terminates quietly" behavior on disconnect.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(Header, SystemMessage)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err("frame exceeds maximum accepted length")
            .simple_msg(ErrorKind::CommunicationMessage, "frame too large");
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    let (header, message) = bincode::deserialize(&payload).simple(ErrorKind::CommunicationMessage)?;
    Ok(Some((header, message)))
}
