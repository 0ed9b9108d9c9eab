//! Frame codec
//!
//! Encoding and decoding of length-prefixed frames.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (2)  │            Body             │
//! └──────────┴─────────────────────────────┘
//! ```
//!
//! The length is little-endian and counts body bytes only.

use std::io::{Read, Write};

use crate::error::{Result, TicknetError};

/// Length prefix size: 2 bytes
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Maximum body size, the ceiling of the 2-byte prefix
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Encode a body as one frame
///
/// Format: body_len (2, LE) + body
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > MAX_BODY_SIZE {
        return Err(TicknetError::FrameTooLarge {
            len: body.len(),
            max: MAX_BODY_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u16).to_le_bytes());
    frame.extend_from_slice(body);

    Ok(frame)
}

/// Decode one frame from the front of a byte slice
///
/// Returns the body and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(TicknetError::Protocol(format!(
            "Incomplete length prefix: expected {} bytes, got {}",
            LENGTH_PREFIX_SIZE,
            bytes.len()
        )));
    }

    let body_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let total_len = LENGTH_PREFIX_SIZE + body_len;
    if bytes.len() < total_len {
        return Err(TicknetError::Protocol(format!(
            "Incomplete body: expected {} bytes, got {}",
            body_len,
            bytes.len() - LENGTH_PREFIX_SIZE
        )));
    }

    Ok((bytes[LENGTH_PREFIX_SIZE..total_len].to_vec(), total_len))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read the 2-byte length prefix of the next frame
///
/// Split out so callers can tell a failed prefix read (nothing of the frame
/// consumed) from a failed body read.
pub fn read_length_prefix<R: Read>(reader: &mut R) -> std::io::Result<usize> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    Ok(u16::from_le_bytes(prefix) as usize)
}

/// Read exactly `len` body bytes
pub fn read_body<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut body = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut body)?;
    }
    Ok(body)
}

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let body_len = read_length_prefix(reader)?;
    Ok(read_body(reader, body_len)?)
}

/// Write a body as one frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let frame = encode_frame(body)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
