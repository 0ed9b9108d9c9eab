//! Configuration for ticknet
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::{Result, TicknetError};

/// Main configuration for a ticknet listener and its driver
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,

    /// How long the accept loop sleeps when no connection is pending
    /// (milliseconds). Bounds how quickly `stop` is observed.
    pub accept_poll_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Tick Configuration
    // -------------------------------------------------------------------------
    /// Time between flushes in the driver (milliseconds)
    pub tick_interval_ms: u64,

    /// Initial capacity of each connection's update buffer (bytes)
    pub update_buffer_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7777".to_string(),
            nodelay: true,
            accept_poll_interval_ms: 50,
            tick_interval_ms: 50, // 20 ticks per second
            update_buffer_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the listener cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(TicknetError::Config("listen address is empty".to_string()));
        }
        if self.accept_poll_interval_ms == 0 {
            return Err(TicknetError::Config(
                "accept poll interval must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(TicknetError::Config(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the accept poll interval (in milliseconds)
    pub fn accept_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.accept_poll_interval_ms = ms;
        self
    }

    /// Set the tick interval (in milliseconds)
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.tick_interval_ms = ms;
        self
    }

    /// Set the initial update buffer capacity (in bytes)
    pub fn update_buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.update_buffer_capacity = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
