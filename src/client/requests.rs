//! Request functions.
//!
//! Each request checks admission and returns immediately. `Ok(())` means
//! the request was accepted; its outcome arrives later through the
//! completion closure, except for fire-and-forget publishes which complete
//! before the call returns. Admission is checked in a fixed order: started,
//! connection state, parameters, then `Busy`.

use bytes::Bytes;

use super::{Client, ConnectionState, SessionParams};
use crate::engine::{
    AsyncOpStatus, Completion, Operation, PublishRequest, PublishStage, Request, WillInfo,
    WillStage,
};
use crate::error::{MqttsnError, Result};
use crate::protocol::{Message, QoS, TopicIdType, TopicRef, WillTopicFields, MAX_TOPIC_ID};
use crate::topics::{as_short_name, has_wildcard};

impl Client {
    /// Connect to the gateway.
    ///
    /// With `will` set, the gateway's WILLTOPICREQ and WILLMSGREQ are
    /// answered from it before the CONNACK arrives.
    pub fn connect<F>(
        &mut self,
        client_id: &str,
        keep_alive_secs: u16,
        clean_session: bool,
        will: Option<WillInfo>,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        if self.state != ConnectionState::Disconnected {
            return Err(MqttsnError::AlreadyConnected);
        }
        Self::validate_client_id(client_id)?;
        if let Some(w) = &will {
            validate_will(w)?;
        }
        self.ensure_idle()?;

        let frame = Message::Connect {
            will: will.is_some(),
            clean_session,
            duration: keep_alive_secs,
            client_id: client_id.to_string(),
        }
        .encode_bytes()?;

        self.start_operation(
            Request::Connect { will },
            Completion::status(on_complete),
            frame,
        )?;
        self.session = Some(SessionParams {
            client_id: client_id.to_string(),
            keep_alive_secs,
            clean_session,
        });
        Ok(())
    }

    /// Disconnect from the gateway.
    ///
    /// Only legal while connected; an asleep client wakes with
    /// [`Client::reconnect`] first. The session is `Disconnected` once the
    /// operation resolves, whatever its status.
    pub fn disconnect<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        self.ensure_idle()?;

        let frame = Message::Disconnect { duration: None }.encode_bytes()?;
        self.start_operation(Request::Disconnect, Completion::status(on_complete), frame)
    }

    /// Resume the last session without clean start.
    ///
    /// Legal while connected or asleep. Failure leaves the session
    /// `Disconnected`.
    pub fn reconnect<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        if self.state == ConnectionState::Disconnected {
            return Err(MqttsnError::NotConnected);
        }
        let session = self.session.as_ref().ok_or(MqttsnError::NotConnected)?;
        self.ensure_idle()?;

        let frame = Message::Connect {
            will: false,
            clean_session: false,
            duration: session.keep_alive_secs,
            client_id: session.client_id.clone(),
        }
        .encode_bytes()?;
        self.start_operation(Request::Reconnect, Completion::status(on_complete), frame)
    }

    /// Subscribe to a topic name, predefined topic or short topic.
    ///
    /// The completion receives the granted QoS on success.
    pub fn subscribe<F>(&mut self, topic: &str, qos: QoS, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus, Option<QoS>) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        if qos == QoS::NoGwPublish {
            return Err(MqttsnError::BadParameter(
                "QoS -1 is only valid for publish".into(),
            ));
        }
        let topic = self.topic_ref(topic)?;
        self.send_subscribe(topic, qos, on_complete)
    }

    /// Subscribe to a predefined topic id, whether or not it is configured.
    pub fn subscribe_id<F>(&mut self, topic_id: u16, qos: QoS, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus, Option<QoS>) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        if qos == QoS::NoGwPublish {
            return Err(MqttsnError::BadParameter(
                "QoS -1 is only valid for publish".into(),
            ));
        }
        validate_topic_id(topic_id)?;
        self.send_subscribe(TopicRef::Predefined(topic_id), qos, on_complete)
    }

    fn send_subscribe<F>(&mut self, topic: TopicRef, qos: QoS, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus, Option<QoS>) + 'static,
    {
        self.ensure_idle()?;

        let msg_id = self.msg_ids.next();
        let frame = Message::Subscribe {
            dup: false,
            qos,
            msg_id,
            topic: topic.clone(),
        }
        .encode_bytes()?;
        self.start_operation(
            Request::Subscribe { topic, msg_id },
            Completion::subscribe(on_complete),
            frame,
        )
    }

    /// Unsubscribe from a topic.
    pub fn unsubscribe<F>(&mut self, topic: &str, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        let topic = self.topic_ref(topic)?;
        self.send_unsubscribe(topic, on_complete)
    }

    /// Unsubscribe from a predefined topic id.
    pub fn unsubscribe_id<F>(&mut self, topic_id: u16, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        validate_topic_id(topic_id)?;
        self.send_unsubscribe(TopicRef::Predefined(topic_id), on_complete)
    }

    fn send_unsubscribe<F>(&mut self, topic: TopicRef, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_idle()?;

        let msg_id = self.msg_ids.next();
        let frame = Message::Unsubscribe { msg_id, topic }.encode_bytes()?;
        self.start_operation(
            Request::Unsubscribe { msg_id },
            Completion::status(on_complete),
            frame,
        )
    }

    /// Publish `data` on `topic`.
    ///
    /// - QoS -1 needs neither a connection nor registration, only a
    ///   predefined or short topic. It completes before returning.
    /// - QoS 0 on a known topic completes before returning; an unknown
    ///   topic is registered first.
    /// - QoS 1 and 2 complete on PUBACK and PUBCOMP.
    ///
    /// `data` is copied.
    pub fn publish<F>(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        data: &[u8],
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        if qos != QoS::NoGwPublish {
            self.ensure_connected()?;
        }
        if topic.is_empty() || has_wildcard(topic) {
            return Err(MqttsnError::BadParameter(format!(
                "cannot publish to topic '{}'",
                topic
            )));
        }

        let resolved = self.resolve_publish_topic(topic);
        if qos == QoS::NoGwPublish
            && !matches!(
                resolved,
                Some((TopicIdType::Predefined | TopicIdType::ShortName, _))
            )
        {
            return Err(MqttsnError::BadParameter(format!(
                "QoS -1 needs a predefined or short topic, got '{}'",
                topic
            )));
        }
        self.send_publish(topic.to_string(), resolved, qos, retain, data, on_complete)
    }

    /// Publish `data` on a predefined topic id.
    ///
    /// The id need not be configured. Like [`Client::publish`], QoS -1
    /// works without a connection.
    pub fn publish_id<F>(
        &mut self,
        topic_id: u16,
        qos: QoS,
        retain: bool,
        data: &[u8],
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        if qos != QoS::NoGwPublish {
            self.ensure_connected()?;
        }
        validate_topic_id(topic_id)?;
        let resolved = Some((TopicIdType::Predefined, topic_id));
        self.send_publish(String::new(), resolved, qos, retain, data, on_complete)
    }

    /// Build the publish exchange. `resolved` is `None` when `topic_name`
    /// still has to be registered.
    fn send_publish<F>(
        &mut self,
        topic_name: String,
        resolved: Option<(TopicIdType, u16)>,
        qos: QoS,
        retain: bool,
        data: &[u8],
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_idle()?;

        let (topic_id_type, topic_id) = resolved.unwrap_or((TopicIdType::Normal, 0));
        let mut request = PublishRequest {
            topic_name,
            topic_id_type,
            topic_id,
            qos,
            retain,
            data: Bytes::copy_from_slice(data),
            msg_id: 0,
            stage: PublishStage::Registering,
        };
        // Reject oversized payloads before any exchange starts.
        let publish_len = request.publish_message().length();
        if publish_len > crate::protocol::MAX_FRAME_LENGTH {
            return Err(MqttsnError::EncodingTooLarge { size: publish_len });
        }

        if resolved.is_none() {
            request.msg_id = self.msg_ids.next();
            let frame = Message::Register {
                topic_id: 0,
                msg_id: request.msg_id,
                topic_name: request.topic_name.clone(),
            }
            .encode_bytes()?;
            return self.start_operation(
                Request::Publish(request),
                Completion::status(on_complete),
                frame,
            );
        }

        match PublishRequest::ack_stage(qos) {
            Some(stage) => {
                request.msg_id = self.msg_ids.next();
                request.stage = stage;
                let frame = request.publish_message().encode_bytes()?;
                self.start_operation(
                    Request::Publish(request),
                    Completion::status(on_complete),
                    frame,
                )
            }
            None => {
                let frame = request.publish_message().encode()?;
                self.sync_clock();
                tracing::debug!(topic_id, ?qos, "Publishing without acknowledgement");
                self.transmit(&frame, false);
                on_complete(AsyncOpStatus::Successful);
                self.reschedule();
                Ok(())
            }
        }
    }

    /// Replace or delete the will.
    ///
    /// `Some` sends WILLTOPICUPD then WILLMSGUPD; `None` sends a single
    /// empty WILLTOPICUPD, which deletes the will on the gateway.
    pub fn will_update<F>(&mut self, will: Option<WillInfo>, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        if let Some(w) = &will {
            validate_will(w)?;
        }
        self.ensure_idle()?;

        let frame = Message::WillTopicUpd {
            will: will.as_ref().map(WillInfo::topic_fields),
        }
        .encode_bytes()?;
        self.start_operation(
            Request::WillUpdate {
                will,
                stage: WillStage::Topic,
            },
            Completion::status(on_complete),
            frame,
        )
    }

    /// Update only the will topic.
    pub fn will_topic_update<F>(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        if topic.is_empty() {
            return Err(MqttsnError::BadParameter("empty will topic".into()));
        }
        if qos == QoS::NoGwPublish {
            return Err(MqttsnError::BadParameter("QoS -1 is not valid for a will".into()));
        }
        self.ensure_idle()?;

        let frame = Message::WillTopicUpd {
            will: Some(WillTopicFields {
                qos,
                retain,
                topic: topic.to_string(),
            }),
        }
        .encode_bytes()?;
        self.start_operation(Request::WillTopicUpdate, Completion::status(on_complete), frame)
    }

    /// Update only the will message. `msg` is copied.
    pub fn will_msg_update<F>(&mut self, msg: &[u8], on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        self.ensure_idle()?;

        let frame = Message::WillMsgUpd {
            msg: Bytes::copy_from_slice(msg),
        }
        .encode_bytes()?;
        self.start_operation(Request::WillMsgUpdate, Completion::status(on_complete), frame)
    }

    /// Enter sleep for `duration_secs`.
    ///
    /// The gateway buffers messages while the client is asleep; fetch them
    /// with [`Client::check_messages`].
    pub fn sleep<F>(&mut self, duration_secs: u16, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        self.ensure_connected()?;
        if duration_secs == 0 {
            return Err(MqttsnError::BadParameter("sleep duration must be non-zero".into()));
        }
        self.ensure_idle()?;

        let frame = Message::Disconnect {
            duration: Some(duration_secs),
        }
        .encode_bytes()?;
        self.start_operation(Request::Sleep, Completion::status(on_complete), frame)
    }

    /// Wake briefly and collect messages buffered by the gateway.
    ///
    /// Buffered messages are delivered through the message report callback
    /// before the completion fires; the session stays asleep.
    pub fn check_messages<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(AsyncOpStatus) + 'static,
    {
        self.ensure_started()?;
        if self.state != ConnectionState::Asleep {
            return Err(MqttsnError::NotSleeping);
        }
        let client_id = self.session.as_ref().map(|s| s.client_id.clone());
        self.ensure_idle()?;

        let frame = Message::Pingreq { client_id }.encode_bytes()?;
        self.start_operation(Request::CheckMessages, Completion::status(on_complete), frame)
    }

    /// Install the operation, send its first frame and arm the retry timer.
    fn start_operation(
        &mut self,
        request: Request,
        completion: Completion,
        frame: Bytes,
    ) -> Result<()> {
        self.sync_clock();
        let kind = request.kind();
        let now = self.clock.now();

        let result = self
            .engine
            .begin(Operation::new(request, completion), frame.clone(), now);
        if result.is_ok() {
            tracing::debug!(?kind, len = frame.len(), "Operation started");
            self.transmit(&frame, false);
        }

        self.reschedule();
        result
    }

    /// Topic designation for SUBSCRIBE / UNSUBSCRIBE.
    fn topic_ref(&self, topic: &str) -> Result<TopicRef> {
        if topic.is_empty() {
            return Err(MqttsnError::BadParameter("empty topic".into()));
        }
        if let Some(id) = self.config.predefined_id(topic) {
            return Ok(TopicRef::Predefined(id));
        }
        if let Some(short) = as_short_name(topic) {
            return Ok(TopicRef::Short(short));
        }
        Ok(TopicRef::Name(topic.to_string()))
    }

    /// Topic id type and id for PUBLISH, if known without registration.
    fn resolve_publish_topic(&self, topic: &str) -> Option<(TopicIdType, u16)> {
        if let Some(id) = self.config.predefined_id(topic) {
            return Some((TopicIdType::Predefined, id));
        }
        if let Some(short) = as_short_name(topic) {
            return Some((TopicIdType::ShortName, u16::from_be_bytes(short)));
        }
        self.topics
            .id_of(topic)
            .map(|id| (TopicIdType::Normal, id))
    }
}

fn validate_topic_id(topic_id: u16) -> Result<()> {
    if topic_id > MAX_TOPIC_ID {
        return Err(MqttsnError::BadParameter(format!(
            "topic id {:#06x} is reserved",
            topic_id
        )));
    }
    Ok(())
}

fn validate_will(will: &WillInfo) -> Result<()> {
    if will.topic.is_empty() {
        return Err(MqttsnError::BadParameter("empty will topic".into()));
    }
    if will.qos == QoS::NoGwPublish {
        return Err(MqttsnError::BadParameter("QoS -1 is not valid for a will".into()));
    }
    let too_large = [
        Message::WillTopic {
            will: Some(will.topic_fields()),
        },
        Message::WillMsg {
            msg: will.msg.clone(),
        },
    ]
    .into_iter()
    .map(|m| m.length())
    .find(|len| *len > crate::protocol::MAX_FRAME_LENGTH);

    match too_large {
        Some(size) => Err(MqttsnError::EncodingTooLarge { size }),
        None => Ok(()),
    }
}
