//! # ticknet
//!
//! Connection management for tick-driven game servers:
//! - Length-prefixed message framing (2-byte little-endian length)
//! - Per-tick update buffers flushed as a single framed write
//! - Idempotent connection close with ordered close hooks
//! - Back-pressured TCP accept loop with explicit shutdown
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Listener                            │
//! │                   (accept thread)                            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ rendezvous channel
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Application Driver                          │
//! │        (reader thread per connection, tick thread)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ read_message│          │buffer_update│
//!   │  (frames)   │          │   + flush   │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod logging;

pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{TicknetError, Result};
pub use config::Config;
pub use logging::Logger;
pub use network::{Connection, Listener, TickConnection};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ticknet
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
