//! Asynchronous operations.
//!
//! An [`Operation`] is one request in flight: its per-kind payload, the
//! completion closure, and the exact bytes last sent. Operations that
//! need several exchanges (connect with a will, publish with
//! registration, QoS 2) advance through [`Operation::react`], which maps
//! an inbound message to the next step.

use std::fmt;

use bytes::Bytes;

use crate::protocol::{Message, QoS, ReturnCode, TopicIdType, TopicRef, WillTopicFields};
use crate::topics::{has_wildcard, TopicRegistry};

/// Kind of an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Disconnect,
    Reconnect,
    Subscribe,
    Unsubscribe,
    Publish,
    WillUpdate,
    WillTopicUpdate,
    WillMsgUpdate,
    Sleep,
    CheckMessages,
}

/// Final status of an accepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncOpStatus {
    Successful,
    /// Gateway rejected the request due to congestion.
    Congestion,
    /// Gateway rejected the topic id.
    InvalidId,
    /// Gateway does not support the request.
    NotSupported,
    /// No response after the last retry.
    Timeout,
    /// Cancelled locally, or the gateway connection was lost.
    Aborted,
}

impl From<ReturnCode> for AsyncOpStatus {
    fn from(code: ReturnCode) -> Self {
        match code {
            ReturnCode::Accepted => AsyncOpStatus::Successful,
            ReturnCode::Congestion => AsyncOpStatus::Congestion,
            ReturnCode::InvalidTopicId => AsyncOpStatus::InvalidId,
            ReturnCode::NotSupported => AsyncOpStatus::NotSupported,
        }
    }
}

impl AsyncOpStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        self == AsyncOpStatus::Successful
    }
}

/// Last will registered with the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillInfo {
    pub topic: String,
    pub msg: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl WillInfo {
    pub fn new(topic: impl Into<String>, msg: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            msg: msg.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub(crate) fn topic_fields(&self) -> WillTopicFields {
        WillTopicFields {
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
        }
    }
}

/// Result delivered to a completion closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: AsyncOpStatus,
    /// QoS granted by SUBACK.
    pub granted_qos: Option<QoS>,
}

impl Outcome {
    pub fn status(status: AsyncOpStatus) -> Self {
        Self {
            status,
            granted_qos: None,
        }
    }
}

impl From<AsyncOpStatus> for Outcome {
    fn from(status: AsyncOpStatus) -> Self {
        Outcome::status(status)
    }
}

impl From<ReturnCode> for Outcome {
    fn from(code: ReturnCode) -> Self {
        Outcome::status(code.into())
    }
}

/// Completion closure of an operation.
pub(crate) enum Completion {
    Status(Box<dyn FnOnce(AsyncOpStatus)>),
    Subscribe(Box<dyn FnOnce(AsyncOpStatus, Option<QoS>)>),
}

impl Completion {
    pub fn status<F: FnOnce(AsyncOpStatus) + 'static>(f: F) -> Self {
        Completion::Status(Box::new(f))
    }

    pub fn subscribe<F: FnOnce(AsyncOpStatus, Option<QoS>) + 'static>(f: F) -> Self {
        Completion::Subscribe(Box::new(f))
    }

    pub fn fire(self, outcome: Outcome) {
        match self {
            Completion::Status(f) => f(outcome.status),
            Completion::Subscribe(f) => f(outcome.status, outcome.granted_qos),
        }
    }
}

/// Message id generator; never yields 0.
#[derive(Debug, Default)]
pub(crate) struct MsgIds {
    last: u16,
}

impl MsgIds {
    pub fn next(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PublishStage {
    Registering,
    AwaitPuback,
    AwaitPubrec,
    AwaitPubcomp,
}

/// Publish payload, including registration state.
#[derive(Debug)]
pub(crate) struct PublishRequest {
    pub topic_name: String,
    pub topic_id_type: TopicIdType,
    pub topic_id: u16,
    pub qos: QoS,
    pub retain: bool,
    pub data: Bytes,
    pub msg_id: u16,
    pub stage: PublishStage,
}

impl PublishRequest {
    pub fn publish_message(&self) -> Message {
        Message::Publish {
            dup: false,
            qos: self.qos,
            retain: self.retain,
            topic_id_type: self.topic_id_type,
            topic_id: self.topic_id,
            msg_id: self.msg_id,
            data: self.data.clone(),
        }
    }

    /// Stage awaiting the acknowledgement of the PUBLISH itself.
    pub fn ack_stage(qos: QoS) -> Option<PublishStage> {
        match qos {
            QoS::AtLeastOnce => Some(PublishStage::AwaitPuback),
            QoS::ExactlyOnce => Some(PublishStage::AwaitPubrec),
            QoS::AtMostOnce | QoS::NoGwPublish => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WillStage {
    Topic,
    Msg,
}

/// Per-kind operation payload.
#[derive(Debug)]
pub(crate) enum Request {
    Connect { will: Option<WillInfo> },
    Reconnect,
    Disconnect,
    Subscribe { topic: TopicRef, msg_id: u16 },
    Unsubscribe { msg_id: u16 },
    Publish(PublishRequest),
    WillUpdate { will: Option<WillInfo>, stage: WillStage },
    WillTopicUpdate,
    WillMsgUpdate,
    Sleep,
    CheckMessages,
}

impl Request {
    pub fn kind(&self) -> OperationKind {
        match self {
            Request::Connect { .. } => OperationKind::Connect,
            Request::Reconnect => OperationKind::Reconnect,
            Request::Disconnect => OperationKind::Disconnect,
            Request::Subscribe { .. } => OperationKind::Subscribe,
            Request::Unsubscribe { .. } => OperationKind::Unsubscribe,
            Request::Publish(_) => OperationKind::Publish,
            Request::WillUpdate { .. } => OperationKind::WillUpdate,
            Request::WillTopicUpdate => OperationKind::WillTopicUpdate,
            Request::WillMsgUpdate => OperationKind::WillMsgUpdate,
            Request::Sleep => OperationKind::Sleep,
            Request::CheckMessages => OperationKind::CheckMessages,
        }
    }
}

/// What the client should do with an inbound message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reaction {
    /// Not a response to this operation.
    Ignore,
    /// Send the next step and re-arm the retry timer.
    Send(Message),
    /// Send a final message that expects no answer, then complete.
    SendAndComplete(Message, Outcome),
    Complete(Outcome),
}

/// Client state an operation may read or update while reacting.
pub(crate) struct ReactContext<'a> {
    pub topics: &'a mut TopicRegistry,
    pub msg_ids: &'a mut MsgIds,
}

/// One asynchronous request in flight.
pub(crate) struct Operation {
    pub request: Request,
    completion: Completion,
    /// Exact bytes last sent, for retransmission.
    pub pending_frame: Bytes,
    pub retries_remaining: u32,
    pub deadline_ms: u64,
}

impl Operation {
    pub fn new(request: Request, completion: Completion) -> Self {
        Self {
            request,
            completion,
            pending_frame: Bytes::new(),
            retries_remaining: 0,
            deadline_ms: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    /// Fire the completion closure, consuming the operation.
    pub fn complete(self, outcome: Outcome) {
        self.completion.fire(outcome);
    }

    /// Advance the operation with an inbound message.
    pub fn react(&mut self, msg: &Message, ctx: &mut ReactContext<'_>) -> Reaction {
        match (&mut self.request, msg) {
            (Request::Connect { will }, Message::WillTopicReq) => Reaction::Send(Message::WillTopic {
                will: will.as_ref().map(WillInfo::topic_fields),
            }),
            (Request::Connect { will }, Message::WillMsgReq) => Reaction::Send(Message::WillMsg {
                msg: will.as_ref().map(|w| w.msg.clone()).unwrap_or_default(),
            }),
            (Request::Connect { .. } | Request::Reconnect, Message::Connack { return_code }) => {
                Reaction::Complete((*return_code).into())
            }

            (Request::Disconnect | Request::Sleep, Message::Disconnect { .. }) => {
                Reaction::Complete(AsyncOpStatus::Successful.into())
            }

            (Request::CheckMessages, Message::Pingresp) => {
                Reaction::Complete(AsyncOpStatus::Successful.into())
            }

            (
                Request::Subscribe { topic, msg_id },
                Message::Suback {
                    qos,
                    topic_id,
                    msg_id: ack_id,
                    return_code,
                },
            ) if *ack_id == *msg_id => {
                if *return_code == ReturnCode::Accepted && *topic_id != 0 {
                    if let TopicRef::Name(name) = topic {
                        if !has_wildcard(name) {
                            ctx.topics.insert(name, *topic_id);
                        }
                    }
                }
                Reaction::Complete(Outcome {
                    status: (*return_code).into(),
                    granted_qos: (*return_code == ReturnCode::Accepted).then_some(*qos),
                })
            }

            (Request::Unsubscribe { msg_id }, Message::Unsuback { msg_id: ack_id })
                if *ack_id == *msg_id =>
            {
                Reaction::Complete(AsyncOpStatus::Successful.into())
            }

            (Request::Publish(publish), _) => react_publish(publish, msg, ctx),

            (Request::WillUpdate { will, stage }, Message::WillTopicResp { return_code })
                if *stage == WillStage::Topic =>
            {
                match (return_code, will.as_ref()) {
                    (ReturnCode::Accepted, Some(w)) => {
                        *stage = WillStage::Msg;
                        Reaction::Send(Message::WillMsgUpd { msg: w.msg.clone() })
                    }
                    _ => Reaction::Complete((*return_code).into()),
                }
            }
            (Request::WillUpdate { stage, .. }, Message::WillMsgResp { return_code })
                if *stage == WillStage::Msg =>
            {
                Reaction::Complete((*return_code).into())
            }

            (Request::WillTopicUpdate, Message::WillTopicResp { return_code })
            | (Request::WillMsgUpdate, Message::WillMsgResp { return_code }) => {
                Reaction::Complete((*return_code).into())
            }

            _ => Reaction::Ignore,
        }
    }
}

fn react_publish(publish: &mut PublishRequest, msg: &Message, ctx: &mut ReactContext<'_>) -> Reaction {
    match (publish.stage, msg) {
        (
            PublishStage::Registering,
            Message::Regack {
                topic_id,
                msg_id,
                return_code,
            },
        ) if *msg_id == publish.msg_id => {
            if *return_code != ReturnCode::Accepted {
                return Reaction::Complete((*return_code).into());
            }
            ctx.topics.insert(&publish.topic_name, *topic_id);
            publish.topic_id = *topic_id;

            match PublishRequest::ack_stage(publish.qos) {
                Some(stage) => {
                    publish.msg_id = ctx.msg_ids.next();
                    publish.stage = stage;
                    Reaction::Send(publish.publish_message())
                }
                None => {
                    publish.msg_id = 0;
                    Reaction::SendAndComplete(
                        publish.publish_message(),
                        AsyncOpStatus::Successful.into(),
                    )
                }
            }
        }
        (
            PublishStage::AwaitPuback,
            Message::Puback {
                msg_id,
                return_code,
                ..
            },
        ) if *msg_id == publish.msg_id => {
            forget_rejected_topic(publish, *return_code, ctx);
            Reaction::Complete((*return_code).into())
        }
        (
            PublishStage::AwaitPubrec,
            Message::Puback {
                msg_id,
                return_code,
                ..
            },
        ) if *msg_id == publish.msg_id && *return_code != ReturnCode::Accepted => {
            forget_rejected_topic(publish, *return_code, ctx);
            Reaction::Complete((*return_code).into())
        }
        (PublishStage::AwaitPubrec, Message::Pubrec { msg_id }) if *msg_id == publish.msg_id => {
            publish.stage = PublishStage::AwaitPubcomp;
            Reaction::Send(Message::Pubrel { msg_id: *msg_id })
        }
        (PublishStage::AwaitPubcomp, Message::Pubcomp { msg_id }) if *msg_id == publish.msg_id => {
            Reaction::Complete(AsyncOpStatus::Successful.into())
        }
        _ => Reaction::Ignore,
    }
}

/// A registered id the gateway no longer knows must be registered again.
fn forget_rejected_topic(publish: &PublishRequest, code: ReturnCode, ctx: &mut ReactContext<'_>) {
    if code == ReturnCode::InvalidTopicId && publish.topic_id_type == TopicIdType::Normal {
        ctx.topics.remove_id(publish.topic_id);
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("request", &self.request)
            .field("pending_frame", &self.pending_frame)
            .field("retries_remaining", &self.retries_remaining)
            .field("deadline_ms", &self.deadline_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Fixture {
        topics: TopicRegistry,
        msg_ids: MsgIds,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                topics: TopicRegistry::new(),
                msg_ids: MsgIds::default(),
            }
        }

        fn react(&mut self, op: &mut Operation, msg: Message) -> Reaction {
            let mut ctx = ReactContext {
                topics: &mut self.topics,
                msg_ids: &mut self.msg_ids,
            };
            op.react(&msg, &mut ctx)
        }
    }

    fn op(request: Request) -> Operation {
        Operation::new(request, Completion::status(|_| {}))
    }

    fn publish_op(qos: QoS, stage: PublishStage, msg_id: u16) -> Operation {
        op(Request::Publish(PublishRequest {
            topic_name: "a/b".into(),
            topic_id_type: TopicIdType::Normal,
            topic_id: 0,
            qos,
            retain: false,
            data: Bytes::from_static(b"v"),
            msg_id,
            stage,
        }))
    }

    #[test]
    fn test_return_code_mapping() {
        assert_eq!(AsyncOpStatus::from(ReturnCode::Accepted), AsyncOpStatus::Successful);
        assert_eq!(AsyncOpStatus::from(ReturnCode::Congestion), AsyncOpStatus::Congestion);
        assert_eq!(AsyncOpStatus::from(ReturnCode::InvalidTopicId), AsyncOpStatus::InvalidId);
        assert_eq!(AsyncOpStatus::from(ReturnCode::NotSupported), AsyncOpStatus::NotSupported);
    }

    #[test]
    fn test_msg_ids_skip_zero() {
        let mut ids = MsgIds { last: u16::MAX - 1 };
        assert_eq!(ids.next(), u16::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn test_connect_will_exchange() {
        let mut fx = Fixture::new();
        let will = WillInfo::new("dev/lwt", &b"gone"[..]).with_qos(QoS::AtLeastOnce);
        let mut connect = op(Request::Connect { will: Some(will) });

        assert_eq!(
            fx.react(&mut connect, Message::WillTopicReq),
            Reaction::Send(Message::WillTopic {
                will: Some(WillTopicFields {
                    qos: QoS::AtLeastOnce,
                    retain: false,
                    topic: "dev/lwt".into()
                })
            })
        );
        assert_eq!(
            fx.react(&mut connect, Message::WillMsgReq),
            Reaction::Send(Message::WillMsg { msg: Bytes::from_static(b"gone") })
        );
        assert_eq!(
            fx.react(&mut connect, Message::Connack { return_code: ReturnCode::Congestion }),
            Reaction::Complete(AsyncOpStatus::Congestion.into())
        );
    }

    #[test]
    fn test_connect_without_will_answers_empty_willtopic() {
        let mut fx = Fixture::new();
        let mut connect = op(Request::Connect { will: None });
        assert_eq!(
            fx.react(&mut connect, Message::WillTopicReq),
            Reaction::Send(Message::WillTopic { will: None })
        );
    }

    #[test]
    fn test_mismatched_msg_id_is_ignored() {
        let mut fx = Fixture::new();
        let mut unsubscribe = op(Request::Unsubscribe { msg_id: 4 });
        assert_eq!(
            fx.react(&mut unsubscribe, Message::Unsuback { msg_id: 5 }),
            Reaction::Ignore
        );
        assert_eq!(
            fx.react(&mut unsubscribe, Message::Pingresp),
            Reaction::Ignore
        );
        assert_eq!(
            fx.react(&mut unsubscribe, Message::Unsuback { msg_id: 4 }),
            Reaction::Complete(AsyncOpStatus::Successful.into())
        );
    }

    #[test]
    fn test_suback_records_topic_and_granted_qos() {
        let mut fx = Fixture::new();
        let mut subscribe = op(Request::Subscribe {
            topic: TopicRef::Name("x/y".into()),
            msg_id: 3,
        });

        let reaction = fx.react(
            &mut subscribe,
            Message::Suback {
                qos: QoS::AtLeastOnce,
                topic_id: 21,
                msg_id: 3,
                return_code: ReturnCode::Accepted,
            },
        );

        assert_eq!(
            reaction,
            Reaction::Complete(Outcome {
                status: AsyncOpStatus::Successful,
                granted_qos: Some(QoS::AtLeastOnce)
            })
        );
        assert_eq!(fx.topics.id_of("x/y"), Some(21));
    }

    #[test]
    fn test_wildcard_suback_not_recorded() {
        let mut fx = Fixture::new();
        let mut subscribe = op(Request::Subscribe {
            topic: TopicRef::Name("x/#".into()),
            msg_id: 3,
        });
        fx.react(
            &mut subscribe,
            Message::Suback {
                qos: QoS::AtMostOnce,
                topic_id: 0,
                msg_id: 3,
                return_code: ReturnCode::Accepted,
            },
        );
        assert!(fx.topics.is_empty());
    }

    #[test]
    fn test_publish_qos0_after_register() {
        let mut fx = Fixture::new();
        let mut publish = publish_op(QoS::AtMostOnce, PublishStage::Registering, 8);

        let reaction = fx.react(
            &mut publish,
            Message::Regack {
                topic_id: 42,
                msg_id: 8,
                return_code: ReturnCode::Accepted,
            },
        );

        match reaction {
            Reaction::SendAndComplete(Message::Publish { topic_id, msg_id, .. }, outcome) => {
                assert_eq!(topic_id, 42);
                assert_eq!(msg_id, 0);
                assert_eq!(outcome.status, AsyncOpStatus::Successful);
            }
            other => panic!("unexpected reaction {:?}", other),
        }
        assert_eq!(fx.topics.id_of("a/b"), Some(42));
    }

    #[test]
    fn test_publish_register_rejected() {
        let mut fx = Fixture::new();
        let mut publish = publish_op(QoS::AtLeastOnce, PublishStage::Registering, 8);

        assert_eq!(
            fx.react(
                &mut publish,
                Message::Regack {
                    topic_id: 0,
                    msg_id: 8,
                    return_code: ReturnCode::NotSupported
                }
            ),
            Reaction::Complete(AsyncOpStatus::NotSupported.into())
        );
        assert!(fx.topics.is_empty());
    }

    #[test]
    fn test_publish_qos2_flow() {
        let mut fx = Fixture::new();
        let mut publish = publish_op(QoS::ExactlyOnce, PublishStage::AwaitPubrec, 11);

        assert_eq!(
            fx.react(&mut publish, Message::Pubcomp { msg_id: 11 }),
            Reaction::Ignore
        );
        assert_eq!(
            fx.react(&mut publish, Message::Pubrec { msg_id: 11 }),
            Reaction::Send(Message::Pubrel { msg_id: 11 })
        );
        assert_eq!(
            fx.react(&mut publish, Message::Pubcomp { msg_id: 11 }),
            Reaction::Complete(AsyncOpStatus::Successful.into())
        );
    }

    #[test]
    fn test_will_update_two_steps() {
        let mut fx = Fixture::new();
        let will = WillInfo::new("t", &b"m"[..]);
        let mut update = op(Request::WillUpdate {
            will: Some(will),
            stage: WillStage::Topic,
        });

        assert_eq!(
            fx.react(&mut update, Message::WillMsgResp { return_code: ReturnCode::Accepted }),
            Reaction::Ignore
        );
        assert_eq!(
            fx.react(&mut update, Message::WillTopicResp { return_code: ReturnCode::Accepted }),
            Reaction::Send(Message::WillMsgUpd { msg: Bytes::from_static(b"m") })
        );
        assert_eq!(
            fx.react(&mut update, Message::WillMsgResp { return_code: ReturnCode::Accepted }),
            Reaction::Complete(AsyncOpStatus::Successful.into())
        );
    }

    #[test]
    fn test_completion_fires_once_with_outcome() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscribe = Operation::new(
            Request::Subscribe {
                topic: TopicRef::Short(*b"ab"),
                msg_id: 1,
            },
            Completion::subscribe(move |status, qos| sink.borrow_mut().push((status, qos))),
        );

        assert_eq!(subscribe.kind(), OperationKind::Subscribe);
        subscribe.complete(AsyncOpStatus::Aborted.into());
        assert_eq!(*seen.borrow(), vec![(AsyncOpStatus::Aborted, None)]);
    }
}
