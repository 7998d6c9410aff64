//! Inbound data: frame splitting, operation responses and unsolicited
//! traffic from the gateway.

use bytes::Bytes;

use super::{Client, ConnectionState};
use crate::callbacks::{IncomingMessage, MessageTopic};
use crate::engine::{ReactContext, Reaction};
use crate::error::MqttsnError;
use crate::protocol::{split_frame, Message, QoS, ReturnCode, TopicIdType};

impl Client {
    /// Feed bytes received from the transport.
    ///
    /// Decodes every complete frame in `data` and returns the number of
    /// bytes consumed. Trailing bytes of an incomplete frame are not
    /// consumed. Malformed or unsupported frames are dropped. Returns 0
    /// when the client is not started.
    pub fn process_data(&mut self, data: &[u8]) -> usize {
        if !self.started {
            tracing::trace!(len = data.len(), "Dropping data, client not started");
            return 0;
        }
        self.sync_clock();

        let mut offset = 0;
        while offset < data.len() {
            match split_frame(&data[offset..]) {
                Ok((frame, consumed)) => {
                    offset += consumed;
                    match self.factory.decode_frame(&frame) {
                        Ok(msg) => self.handle_message(msg),
                        Err(e) => tracing::warn!(
                            msg_type = frame.msg_type(),
                            "Dropping frame: {}",
                            e
                        ),
                    }
                }
                Err(MqttsnError::Incomplete) => break,
                Err(e) => {
                    // Without a usable length the rest cannot be framed.
                    tracing::warn!(len = data.len() - offset, "Dropping data: {}", e);
                    offset = data.len();
                }
            }
        }

        self.reschedule();
        offset
    }

    fn handle_message(&mut self, msg: Message) {
        tracing::trace!(msg = msg.name(), "Received");

        let reaction = match self.engine.active_mut() {
            Some(op) => {
                let mut ctx = ReactContext {
                    topics: &mut self.topics,
                    msg_ids: &mut self.msg_ids,
                };
                op.react(&msg, &mut ctx)
            }
            None => Reaction::Ignore,
        };

        match reaction {
            Reaction::Ignore => self.handle_unsolicited(msg),
            Reaction::Send(next) => match next.encode_bytes() {
                Ok(frame) => {
                    tracing::debug!(msg = next.name(), "Next exchange step");
                    self.transmit(&frame, false);
                    let now = self.clock.now();
                    self.engine.arm(frame, now);
                }
                Err(e) => tracing::warn!(msg = next.name(), "Failed to encode: {}", e),
            },
            Reaction::SendAndComplete(last, outcome) => {
                self.send_message(&last, false);
                if let Some(op) = self.engine.take() {
                    self.finish(op, outcome);
                }
            }
            Reaction::Complete(outcome) => {
                if let Some(op) = self.engine.take() {
                    self.finish(op, outcome);
                }
            }
        }
    }

    fn handle_unsolicited(&mut self, msg: Message) {
        let now = self.clock.now();

        match msg {
            Message::Advertise { gw_id, duration } => {
                if let Some(status) =
                    self.gateways
                        .record_advertisement(gw_id, duration, Bytes::new(), now)
                {
                    self.callbacks.report_gw_status(gw_id, status);
                }
            }
            Message::GwInfo { gw_id, gw_add } => {
                if let Some(status) = self.gateways.record_search_reply(gw_id, gw_add, now) {
                    self.callbacks.report_gw_status(gw_id, status);
                }
            }
            Message::Register {
                topic_id,
                msg_id,
                topic_name,
            } => {
                tracing::debug!(topic_id, topic = %topic_name, "Gateway registered topic");
                self.topics.insert(&topic_name, topic_id);
                self.send_message(
                    &Message::Regack {
                        topic_id,
                        msg_id,
                        return_code: ReturnCode::Accepted,
                    },
                    false,
                );
            }
            Message::Publish {
                qos,
                retain,
                topic_id_type,
                topic_id,
                msg_id,
                data,
                ..
            } => self.handle_publish(qos, retain, topic_id_type, topic_id, msg_id, data),
            Message::Pubrel { msg_id } => {
                self.awaiting_pubrel.remove(&msg_id);
                self.send_message(&Message::Pubcomp { msg_id }, false);
            }
            Message::Pingreq { .. } => self.send_message(&Message::Pingresp, false),
            Message::Pingresp => self.keep_alive.ping = None,
            Message::Disconnect { .. } if self.state != ConnectionState::Disconnected => {
                self.gateway_lost();
            }
            other => tracing::trace!(msg = other.name(), "Ignoring unexpected message"),
        }
    }

    fn handle_publish(
        &mut self,
        qos: QoS,
        retained: bool,
        topic_id_type: TopicIdType,
        topic_id: u16,
        msg_id: u16,
        payload: Bytes,
    ) {
        let topic = match topic_id_type {
            TopicIdType::Normal => match self.topics.name_of(topic_id) {
                Some(name) => MessageTopic::Name(name.to_string()),
                None => {
                    tracing::warn!(topic_id, "PUBLISH for unknown topic id");
                    if qos.is_acknowledged() {
                        self.send_message(
                            &Message::Puback {
                                topic_id,
                                msg_id,
                                return_code: ReturnCode::InvalidTopicId,
                            },
                            false,
                        );
                    }
                    return;
                }
            },
            TopicIdType::Predefined => match self.config.predefined_name(topic_id) {
                Some(name) => MessageTopic::Name(name.to_string()),
                None => MessageTopic::Id(topic_id),
            },
            TopicIdType::ShortName => {
                MessageTopic::Name(String::from_utf8_lossy(&topic_id.to_be_bytes()).into_owned())
            }
        };

        let incoming = IncomingMessage {
            topic,
            payload,
            qos,
            retained,
        };

        match qos {
            QoS::ExactlyOnce => {
                // Redelivered before PUBREL: acknowledge again, report once.
                if self.awaiting_pubrel.insert(msg_id) {
                    self.callbacks.report_message(&incoming);
                }
                self.send_message(&Message::Pubrec { msg_id }, false);
            }
            QoS::AtLeastOnce => {
                self.callbacks.report_message(&incoming);
                self.send_message(
                    &Message::Puback {
                        topic_id,
                        msg_id,
                        return_code: ReturnCode::Accepted,
                    },
                    false,
                );
            }
            QoS::AtMostOnce | QoS::NoGwPublish => self.callbacks.report_message(&incoming),
        }
    }
}
