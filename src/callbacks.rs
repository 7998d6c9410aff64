//! Platform callbacks.
//!
//! The client never touches a socket or a clock directly. The platform
//! supplies boxed closures for sending datagrams, driving a single-shot
//! timer, and receiving reports. Send, program-timer, cancel-timer and
//! message-report are mandatory; `start()` fails without them.

use bytes::Bytes;

use crate::error::{MqttsnError, Result};
use crate::gateway::GwStatus;
use crate::protocol::QoS;

/// Deliver one frame; the flag requests the broadcast address.
pub type SendFn = Box<dyn FnMut(&[u8], bool)>;

/// Schedule a `tick()` in the given number of milliseconds.
pub type ProgramTimerFn = Box<dyn FnMut(u32)>;

/// Cancel the scheduled tick and report the milliseconds elapsed since it
/// was programmed.
pub type CancelTimerFn = Box<dyn FnMut() -> u32>;

/// Receive an application message published by the gateway.
pub type MessageReportFn = Box<dyn FnMut(&IncomingMessage)>;

/// Receive gateway table changes.
pub type GwStatusReportFn = Box<dyn FnMut(u8, GwStatus)>;

/// Notified when the gateway drops the connection or stops answering.
pub type GwDisconnectReportFn = Box<dyn FnMut()>;

/// Topic of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTopic {
    /// Registered, predefined-by-config, or short topic name.
    Name(String),
    /// Predefined id with no configured name.
    Id(u16),
}

/// Application message delivered through the message report callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: MessageTopic,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
}

/// Registered platform callbacks.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub send: Option<SendFn>,
    pub program_timer: Option<ProgramTimerFn>,
    pub cancel_timer: Option<CancelTimerFn>,
    pub message_report: Option<MessageReportFn>,
    pub gw_status_report: Option<GwStatusReportFn>,
    pub gw_disconnect_report: Option<GwDisconnectReportFn>,
}

impl Callbacks {
    /// Check that every mandatory callback is set.
    pub fn validate(&self) -> Result<()> {
        if self.send.is_none() {
            return Err(MqttsnError::MissingCallback("send"));
        }
        if self.program_timer.is_none() {
            return Err(MqttsnError::MissingCallback("program_timer"));
        }
        if self.cancel_timer.is_none() {
            return Err(MqttsnError::MissingCallback("cancel_timer"));
        }
        if self.message_report.is_none() {
            return Err(MqttsnError::MissingCallback("message_report"));
        }
        Ok(())
    }

    pub fn send(&mut self, frame: &[u8], broadcast: bool) {
        if let Some(send) = self.send.as_mut() {
            send(frame, broadcast);
        }
    }

    pub fn program_timer(&mut self, ms: u32) {
        if let Some(program) = self.program_timer.as_mut() {
            program(ms);
        }
    }

    /// Returns 0 when no cancel callback is set.
    pub fn cancel_timer(&mut self) -> u32 {
        self.cancel_timer.as_mut().map_or(0, |cancel| cancel())
    }

    pub fn report_message(&mut self, msg: &IncomingMessage) {
        if let Some(report) = self.message_report.as_mut() {
            report(msg);
        }
    }

    pub fn report_gw_status(&mut self, gw_id: u8, status: GwStatus) {
        if let Some(report) = self.gw_status_report.as_mut() {
            report(gw_id, status);
        }
    }

    pub fn report_gw_disconnect(&mut self) {
        if let Some(report) = self.gw_disconnect_report.as_mut() {
            report();
        }
    }
}
