//! Fluent client construction.

use super::Client;
use crate::callbacks::{Callbacks, IncomingMessage};
use crate::config::ClientConfig;
use crate::dispatch::DispatchStrategy;
use crate::error::Result;
use crate::gateway::GwStatus;

/// Builder for configuring and creating a [`Client`].
///
/// Set the platform callbacks and configuration, then call `build()` for a
/// stopped client or `start()` for a running one.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    callbacks: Callbacks,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Seconds to wait for a response before retransmitting.
    ///
    /// Default: 15
    pub fn retry_period(mut self, secs: u16) -> Self {
        self.config.retry_period_secs = secs;
        self
    }

    /// Retransmissions after the initial send.
    ///
    /// Default: 3
    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    /// Radius of SEARCHGW broadcasts.
    ///
    /// Default: 0
    pub fn broadcast_radius(mut self, radius: u8) -> Self {
        self.config.broadcast_radius = radius;
        self
    }

    /// Enable or disable automatic gateway search.
    ///
    /// Default: enabled
    pub fn search_gw(mut self, enabled: bool) -> Self {
        self.config.search_gw_enabled = enabled;
        self
    }

    pub fn dispatch_strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.config.dispatch = strategy;
        self
    }

    /// Declare a topic provisioned on the gateway with a fixed id.
    pub fn predefined_topic(mut self, name: &str, id: u16) -> Self {
        self.config.predefined_topics.insert(name.to_string(), id);
        self
    }

    pub fn on_send<F: FnMut(&[u8], bool) + 'static>(mut self, f: F) -> Self {
        self.callbacks.send = Some(Box::new(f));
        self
    }

    pub fn on_program_timer<F: FnMut(u32) + 'static>(mut self, f: F) -> Self {
        self.callbacks.program_timer = Some(Box::new(f));
        self
    }

    pub fn on_cancel_timer<F: FnMut() -> u32 + 'static>(mut self, f: F) -> Self {
        self.callbacks.cancel_timer = Some(Box::new(f));
        self
    }

    pub fn on_message<F: FnMut(&IncomingMessage) + 'static>(mut self, f: F) -> Self {
        self.callbacks.message_report = Some(Box::new(f));
        self
    }

    pub fn on_gw_status<F: FnMut(u8, GwStatus) + 'static>(mut self, f: F) -> Self {
        self.callbacks.gw_status_report = Some(Box::new(f));
        self
    }

    pub fn on_gw_disconnect<F: FnMut() + 'static>(mut self, f: F) -> Self {
        self.callbacks.gw_disconnect_report = Some(Box::new(f));
        self
    }

    /// Build a stopped client.
    pub fn build(self) -> Client {
        Client::with_callbacks(self.config, self.callbacks)
    }

    /// Build and start the client.
    pub fn start(self) -> Result<Client> {
        let mut client = self.build();
        client.start()?;
        Ok(client)
    }
}
