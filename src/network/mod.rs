//! Network Module
//!
//! TCP listener and client connections.
//!
//! ## Architecture
//! - Single acceptor thread
//! - Accepted connections handed to the driver over a rendezvous channel,
//!   so a slow driver throttles intake
//! - Driver owns one reader thread per connection and one tick thread

mod listener;
mod connection;

pub use listener::Listener;
pub use connection::{Connection, TickConnection};
