//! # mqttsn-client
//!
//! Callback-driven MQTT-SN v1.2 client engine.
//!
//! The engine owns no sockets, threads or clocks. The platform supplies:
//!
//! - **send**: hand a frame to the transport (unicast or broadcast)
//! - **program_timer / cancel_timer**: a single one-shot timer
//! - **message_report**: delivery of inbound PUBLISH payloads
//!
//! and feeds the engine with [`Client::process_data`] for received bytes
//! and [`Client::tick`] when the timer expires.
//!
//! ## Architecture
//!
//! - **protocol**: length-prefixed frames and the MQTT-SN message codec
//! - **dispatch**: message type id to decoder lookup
//! - **engine**: single in-flight operation with retransmission
//! - **client**: session state, gateways, topics, keep-alive
//!
//! ## Example
//!
//! ```
//! use mqttsn_client::{AsyncOpStatus, Client, QoS};
//!
//! let mut client = Client::builder()
//!     .search_gw(false)
//!     .predefined_topic("sensors/temp", 7)
//!     .on_send(|frame, _| println!("send {:02x?}", frame))
//!     .on_program_timer(|_| {})
//!     .on_cancel_timer(|| 0)
//!     .on_message(|_| {})
//!     .start()
//!     .unwrap();
//!
//! // QoS -1 publishes need no connection and complete immediately.
//! client
//!     .publish("sensors/temp", QoS::NoGwPublish, false, b"21.5", |status| {
//!         assert_eq!(status, AsyncOpStatus::Successful);
//!     })
//!     .unwrap();
//! ```

pub mod callbacks;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod topics;

mod client;

pub use callbacks::{IncomingMessage, MessageTopic};
pub use client::{Client, ClientBuilder, ConnectionState};
pub use config::ClientConfig;
pub use dispatch::DispatchStrategy;
pub use engine::{AsyncOpStatus, OpPhase, OperationKind, Outcome, RetryPolicy, WillInfo};
pub use error::{MqttsnError, Result};
pub use gateway::{GatewayEntry, GatewayTable, GwStatus};
pub use protocol::{Message, QoS, ReturnCode};
