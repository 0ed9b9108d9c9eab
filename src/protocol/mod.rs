//! Protocol Module
//!
//! Defines the wire protocol between server and clients.
//!
//! ## Frame Format (both directions)
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (2)  │            Body             │
//! └──────────┴─────────────────────────────┘
//! ```
//!
//! ## Tick Update (server → client, one per flush)
//! Sent as the body of a single frame:
//! ```text
//! ┌──────────┬─────────────────────────────┬──────────┐
//! │ Tick (4) │          Payload            │ 0x00 (1) │
//! └──────────┴─────────────────────────────┴──────────┘
//! ```
//!
//! All integers are little-endian. Bodies are opaque; message semantics
//! belong to the application.

mod framing;
mod tick;

pub use framing::{
    decode_frame, encode_frame, read_body, read_frame, read_length_prefix, write_frame,
    LENGTH_PREFIX_SIZE, MAX_BODY_SIZE,
};
pub use tick::{
    decode_tick_update, encode_tick_update, TickUpdate, MIN_TICK_UPDATE_SIZE, TICK_SIZE,
    TICK_TERMINATOR,
};
