//! Fakes shared by the unit tests of this crate.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, SenderHandle},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{parse_command, InboundMessage, OutgoingMessage},
    },
    Result,
};

/// Records every outgoing message and hands out sequential message ids.
#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sent: Mutex<Vec<OutgoingMessage>>,
    failing: AtomicBool,
}

impl FakeMessenger {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }

    pub fn last(&self) -> Option<OutgoingMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send(&self, msg: OutgoingMessage) -> Result<MessageRef> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("fake transport down".to_string()));
        }
        let id = {
            let mut guard = self.next_id.lock().unwrap();
            let id = *guard + 1000;
            *guard += 1;
            id
        };
        let chat_id = msg.chat_id;
        self.sent.lock().unwrap().push(msg);
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }
}

/// Build an inbound message; texts starting with `/` become commands.
pub fn inbound(chat: i64, message_id: i32, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id: ChatId(chat),
        message_id: MessageId(message_id),
        sender: SenderHandle(format!("tg-{chat}")),
        text: text.to_string(),
        command: parse_command(text).map(|(cmd, _)| cmd),
        reply_to: None,
    }
}

/// Build a reply to a previously sent prompt.
pub fn reply(chat: i64, message_id: i32, to: MessageId, text: &str) -> InboundMessage {
    InboundMessage {
        reply_to: Some(to),
        ..inbound(chat, message_id, text)
    }
}
