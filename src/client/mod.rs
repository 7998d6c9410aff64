//! Client session.
//!
//! [`Client`] composes the codec, the gateway table, the topic registry
//! and the operation engine, and talks to the platform only through its
//! callbacks. Every public method runs to completion without blocking:
//!
//! 1. Check admission (no state is touched on error)
//! 2. Cancel the platform timer to bring the engine clock up to date
//! 3. Do the work, sending frames through the send callback
//! 4. Program the timer for the earliest pending deadline
//!
//! # Example
//!
//! ```
//! use mqttsn_client::{AsyncOpStatus, Client};
//!
//! let mut client = Client::builder()
//!     .search_gw(false)
//!     .on_send(|frame, broadcast| println!("send {:02x?} broadcast={}", frame, broadcast))
//!     .on_program_timer(|ms| println!("tick in {} ms", ms))
//!     .on_cancel_timer(|| 0)
//!     .on_message(|msg| println!("message on {:?}", msg.topic))
//!     .start()
//!     .unwrap();
//!
//! client
//!     .connect("dev1", 60, true, None, |status| {
//!         assert_eq!(status, AsyncOpStatus::Aborted);
//!     })
//!     .unwrap();
//! assert!(client.cancel());
//! ```

mod builder;
mod inbound;
mod requests;
mod timers;

pub use builder::ClientBuilder;

use std::collections::HashSet;

use bytes::Bytes;

use crate::callbacks::{
    Callbacks, CancelTimerFn, GwDisconnectReportFn, GwStatusReportFn, IncomingMessage,
    MessageReportFn, ProgramTimerFn, SendFn,
};
use crate::config::ClientConfig;
use crate::engine::{
    AsyncOpStatus, EngineClock, MsgIds, OpPhase, Operation, OperationEngine, OperationKind,
    Outcome,
};
use crate::error::{MqttsnError, Result};
use crate::gateway::{GatewayTable, GwStatus};
use crate::protocol::{Message, MessageFactory, MAX_CLIENT_ID_LEN};
use crate::topics::TopicRegistry;

/// Connection state towards the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Asleep,
}

/// Parameters of the last connect request.
#[derive(Debug, Clone)]
struct SessionParams {
    client_id: String,
    keep_alive_secs: u16,
    clean_session: bool,
}

/// Keep-alive PINGREQ awaiting its PINGRESP.
#[derive(Debug)]
struct PendingPing {
    frame: Bytes,
    retries_remaining: u32,
    deadline_ms: u64,
}

#[derive(Debug, Default)]
struct KeepAlive {
    last_send_ms: u64,
    ping: Option<PendingPing>,
}

/// MQTT-SN client engine.
pub struct Client {
    config: ClientConfig,
    callbacks: Callbacks,
    factory: MessageFactory,
    engine: OperationEngine,
    clock: EngineClock,
    gateways: GatewayTable,
    topics: TopicRegistry,
    state: ConnectionState,
    session: Option<SessionParams>,
    started: bool,
    msg_ids: MsgIds,
    /// Inbound QoS 2 message ids reported but not yet released.
    awaiting_pubrel: HashSet<u16>,
    keep_alive: KeepAlive,
    search_deadline: Option<u64>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a stopped client with no callbacks.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            factory: MessageFactory::new(config.dispatch),
            engine: OperationEngine::new(config.retry_policy()),
            config,
            callbacks: Callbacks::default(),
            clock: EngineClock::new(),
            gateways: GatewayTable::new(),
            topics: TopicRegistry::new(),
            state: ConnectionState::Disconnected,
            session: None,
            started: false,
            msg_ids: MsgIds::default(),
            awaiting_pubrel: HashSet::new(),
            keep_alive: KeepAlive::default(),
            search_deadline: None,
        }
    }

    pub(crate) fn with_callbacks(config: ClientConfig, callbacks: Callbacks) -> Self {
        let mut client = Self::new(config);
        client.callbacks = callbacks;
        client
    }

    pub fn set_send<F: FnMut(&[u8], bool) + 'static>(&mut self, f: F) {
        self.callbacks.send = Some(Box::new(f) as SendFn);
    }

    pub fn set_program_timer<F: FnMut(u32) + 'static>(&mut self, f: F) {
        self.callbacks.program_timer = Some(Box::new(f) as ProgramTimerFn);
    }

    pub fn set_cancel_timer<F: FnMut() -> u32 + 'static>(&mut self, f: F) {
        self.callbacks.cancel_timer = Some(Box::new(f) as CancelTimerFn);
    }

    pub fn set_message_report<F: FnMut(&IncomingMessage) + 'static>(&mut self, f: F) {
        self.callbacks.message_report = Some(Box::new(f) as MessageReportFn);
    }

    pub fn set_gw_status_report<F: FnMut(u8, GwStatus) + 'static>(&mut self, f: F) {
        self.callbacks.gw_status_report = Some(Box::new(f) as GwStatusReportFn);
    }

    pub fn set_gw_disconnect_report<F: FnMut() + 'static>(&mut self, f: F) {
        self.callbacks.gw_disconnect_report = Some(Box::new(f) as GwDisconnectReportFn);
    }

    /// Replace the configuration of a stopped client.
    pub fn set_config(&mut self, config: ClientConfig) -> Result<()> {
        if self.started {
            return Err(MqttsnError::AlreadyStarted);
        }
        self.config = config;
        Ok(())
    }

    /// Start the client.
    ///
    /// Broadcasts a SEARCHGW when gateway search is enabled.
    ///
    /// # Errors
    ///
    /// - `AlreadyStarted` if running
    /// - `MissingCallback` if a mandatory callback is not set
    /// - `BadParameter` if the configuration is out of range
    ///
    /// A failed start leaves the client stopped and ready for another try.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(MqttsnError::AlreadyStarted);
        }
        self.callbacks.validate()?;
        self.config.validate()?;

        self.factory = MessageFactory::new(self.config.dispatch);
        self.engine.set_policy(self.config.retry_policy());
        self.started = true;
        tracing::debug!(
            retry_period_secs = self.config.retry_period_secs,
            retry_count = self.config.retry_count,
            "Client started"
        );

        if self.config.search_gw_enabled {
            self.send_search();
        }
        self.reschedule();
        Ok(())
    }

    /// Stop the client.
    ///
    /// Aborts the active operation, cancels the platform timer and drops
    /// to `Disconnected`. Stopping a stopped client does nothing.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.sync_clock();
        if let Some(op) = self.engine.take() {
            self.finish(op, AsyncOpStatus::Aborted.into());
        }
        self.started = false;
        self.state = ConnectionState::Disconnected;
        self.topics.clear();
        self.awaiting_pubrel.clear();
        self.keep_alive.ping = None;
        self.search_deadline = None;
        tracing::debug!("Client stopped");
    }

    /// Cancel the active operation.
    ///
    /// Its completion fires with `Aborted`. Returns false if nothing was
    /// active.
    pub fn cancel(&mut self) -> bool {
        let Some(op) = self.engine.take() else {
            return false;
        };
        self.sync_clock();
        tracing::debug!(kind = ?op.kind(), "Operation cancelled");
        self.finish(op, AsyncOpStatus::Aborted.into());
        self.reschedule();
        true
    }

    /// Broadcast one SEARCHGW now.
    pub fn search_gw(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.sync_clock();
        self.send_search();
        self.reschedule();
        Ok(())
    }

    /// Forget gateway `id`, reporting `Discarded` if it was known.
    pub fn discard_gw(&mut self, id: u8) -> bool {
        self.sync_clock();
        let removed = self.gateways.discard(id);
        if removed {
            self.callbacks.report_gw_status(id, GwStatus::Discarded);
        }
        self.reschedule();
        removed
    }

    /// Forget every gateway, reporting `Discarded` for each.
    pub fn discard_all_gw(&mut self) {
        self.sync_clock();
        for id in self.gateways.discard_all() {
            self.callbacks.report_gw_status(id, GwStatus::Discarded);
        }
        self.reschedule();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn phase(&self) -> OpPhase {
        self.engine.phase()
    }

    /// Kind of the operation in flight.
    pub fn active_operation(&self) -> Option<OperationKind> {
        self.engine.active_kind()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateways(&self) -> &GatewayTable {
        &self.gateways
    }

    /// Topic id registered for `name` in this session.
    pub fn topic_id(&self, name: &str) -> Option<u16> {
        self.topics.id_of(name)
    }

    /// Engine clock in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now()
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.started {
            return Err(MqttsnError::NotStarted);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.engine.is_busy() {
            return Err(MqttsnError::Busy);
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(MqttsnError::NotConnected);
        }
        Ok(())
    }

    fn validate_client_id(client_id: &str) -> Result<()> {
        if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(MqttsnError::BadParameter(format!(
                "client id must be 1 to {} bytes, got {}",
                MAX_CLIENT_ID_LEN,
                client_id.len()
            )));
        }
        Ok(())
    }

    /// Hand a frame to the platform.
    fn transmit(&mut self, frame: &[u8], broadcast: bool) {
        self.callbacks.send(frame, broadcast);
        self.keep_alive.last_send_ms = self.clock.now();
    }

    /// Encode and send a message outside of any operation.
    fn send_message(&mut self, msg: &Message, broadcast: bool) {
        match msg.encode() {
            Ok(frame) => {
                tracing::trace!(msg = msg.name(), len = frame.len(), "Sending");
                self.transmit(&frame, broadcast);
            }
            Err(e) => tracing::warn!(msg = msg.name(), "Failed to encode: {}", e),
        }
    }

    fn send_search(&mut self) {
        let radius = self.config.broadcast_radius;
        self.send_message(&Message::SearchGw { radius }, true);
        self.search_deadline = Some(self.clock.now() + self.engine.policy().period_ms());
    }

    /// Resolve an operation: apply its session state rule, then fire its
    /// completion.
    fn finish(&mut self, op: Operation, outcome: Outcome) {
        let kind = op.kind();
        let success = outcome.status.is_success();

        match kind {
            OperationKind::Connect if success => {
                if self.session.as_ref().is_some_and(|s| s.clean_session) {
                    self.topics.clear();
                    self.awaiting_pubrel.clear();
                }
                self.enter_connected();
            }
            OperationKind::Reconnect if success => self.enter_connected(),
            OperationKind::Reconnect => self.state = ConnectionState::Disconnected,
            OperationKind::Disconnect => {
                self.state = ConnectionState::Disconnected;
                self.topics.clear();
                self.awaiting_pubrel.clear();
                self.keep_alive.ping = None;
            }
            OperationKind::Sleep if success => {
                self.state = ConnectionState::Asleep;
                self.keep_alive.ping = None;
            }
            _ => {}
        }

        tracing::debug!(?kind, status = ?outcome.status, state = ?self.state, "Operation completed");
        op.complete(outcome);
    }

    fn enter_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.keep_alive.ping = None;
        self.keep_alive.last_send_ms = self.clock.now();
    }

    /// The gateway dropped us or stopped answering.
    fn gateway_lost(&mut self) {
        tracing::warn!(state = ?self.state, "Gateway connection lost");
        self.state = ConnectionState::Disconnected;
        self.topics.clear();
        self.awaiting_pubrel.clear();
        self.keep_alive.ping = None;

        if let Some(op) = self.engine.take() {
            self.finish(op, AsyncOpStatus::Aborted.into());
        }
        self.callbacks.report_gw_disconnect();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("started", &self.started)
            .field("active", &self.engine.active_kind())
            .field("now_ms", &self.clock.now())
            .field("gateways", &self.gateways.len())
            .field("topics", &self.topics.len())
            .finish()
    }
}
