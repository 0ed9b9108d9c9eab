//! Tick-update bodies
//!
//! The body a connection sends once per tick, carrying everything buffered
//! since the previous flush.
//!
//! ```text
//! ┌──────────┬─────────────────────────────┬──────────┐
//! │ Tick (4) │          Payload            │ 0x00 (1) │
//! └──────────┴─────────────────────────────┴──────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TicknetError};

/// Tick counter size: 4 bytes, little-endian
pub const TICK_SIZE: usize = 4;

/// Terminator appended after the payload
pub const TICK_TERMINATOR: u8 = 0x00;

/// Smallest valid body: tick + terminator, no payload
pub const MIN_TICK_UPDATE_SIZE: usize = TICK_SIZE + 1;

/// A decoded tick update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickUpdate {
    /// Tick the payload was flushed on
    pub tick: u32,

    /// Concatenation of everything buffered since the previous flush
    pub payload: Bytes,
}

/// Build a tick-update body
///
/// Format: tick (4, LE) + payload + terminator (1)
pub fn encode_tick_update(tick: u32, payload: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(MIN_TICK_UPDATE_SIZE + payload.len());
    body.put_u32_le(tick);
    body.put_slice(payload);
    body.put_u8(TICK_TERMINATOR);
    body.freeze()
}

/// Decode a tick-update body
pub fn decode_tick_update(body: &[u8]) -> Result<TickUpdate> {
    if body.len() < MIN_TICK_UPDATE_SIZE {
        return Err(TicknetError::Protocol(format!(
            "Tick update too short: expected at least {} bytes, got {}",
            MIN_TICK_UPDATE_SIZE,
            body.len()
        )));
    }

    let last = body[body.len() - 1];
    if last != TICK_TERMINATOR {
        return Err(TicknetError::Protocol(format!(
            "Tick update missing terminator: last byte is 0x{:02x}",
            last
        )));
    }

    let tick = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let payload = Bytes::copy_from_slice(&body[TICK_SIZE..body.len() - 1]);

    Ok(TickUpdate { tick, payload })
}
