//! Shared fixtures: a recording platform and gateway-side helpers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use mqttsn_client::protocol::Message;
use mqttsn_client::{Client, ClientBuilder, GwStatus, IncomingMessage, ReturnCode};

/// Everything the client handed to the platform.
#[derive(Debug, Default)]
pub struct Recorded {
    /// Frames with their broadcast flag.
    pub sent: Vec<(Vec<u8>, bool)>,
    pub timers: Vec<u32>,
    pub cancels: u32,
    /// Value returned from the cancel callback.
    pub cancel_elapsed: u32,
    pub messages: Vec<IncomingMessage>,
    pub gw_status: Vec<(u8, GwStatus)>,
    pub gw_disconnects: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Platform(pub Rc<RefCell<Recorded>>);

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder with every callback wired to this platform and gateway
    /// search disabled.
    pub fn builder(&self) -> ClientBuilder {
        let send = self.0.clone();
        let program = self.0.clone();
        let cancel = self.0.clone();
        let message = self.0.clone();
        let status = self.0.clone();
        let disconnect = self.0.clone();

        Client::builder()
            .search_gw(false)
            .on_send(move |frame, broadcast| send.borrow_mut().sent.push((frame.to_vec(), broadcast)))
            .on_program_timer(move |ms| program.borrow_mut().timers.push(ms))
            .on_cancel_timer(move || {
                let mut rec = cancel.borrow_mut();
                rec.cancels += 1;
                let elapsed = rec.cancel_elapsed;
                elapsed
            })
            .on_message(move |msg| message.borrow_mut().messages.push(msg.clone()))
            .on_gw_status(move |id, s| status.borrow_mut().gw_status.push((id, s)))
            .on_gw_disconnect(move || disconnect.borrow_mut().gw_disconnects += 1)
    }

    pub fn sent_count(&self) -> usize {
        self.0.borrow().sent.len()
    }

    /// Decoded frames sent so far.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.0
            .borrow()
            .sent
            .iter()
            .map(|(frame, _)| Message::decode(frame).unwrap().0)
            .collect()
    }

    pub fn last_sent(&self) -> Message {
        self.sent_messages().pop().expect("nothing sent")
    }

    pub fn last_timer(&self) -> Option<u32> {
        self.0.borrow().timers.last().copied()
    }

    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    pub fn messages(&self) -> Vec<IncomingMessage> {
        self.0.borrow().messages.clone()
    }

    pub fn gw_status(&self) -> Vec<(u8, GwStatus)> {
        self.0.borrow().gw_status.clone()
    }

    pub fn gw_disconnects(&self) -> u32 {
        self.0.borrow().gw_disconnects
    }
}

/// Feed one gateway message to the client.
pub fn deliver(client: &mut Client, msg: Message) {
    let frame = msg.encode().unwrap();
    assert_eq!(client.process_data(&frame), frame.len());
}

pub fn connack(code: ReturnCode) -> Message {
    Message::Connack { return_code: code }
}

/// Started client, connected with the given keep-alive, sent frames cleared.
pub fn connected_client(platform: &Platform, keep_alive_secs: u16) -> Client {
    connected_with(platform.builder(), platform, keep_alive_secs)
}

pub fn connected_with(builder: ClientBuilder, platform: &Platform, keep_alive_secs: u16) -> Client {
    let mut client = builder.start().unwrap();
    client
        .connect("dev1", keep_alive_secs, true, None, |status| {
            assert!(status.is_success());
        })
        .unwrap();
    deliver(&mut client, connack(ReturnCode::Accepted));
    platform.clear_sent();
    client
}
