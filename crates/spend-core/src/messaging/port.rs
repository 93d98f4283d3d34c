use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::OutgoingMessage,
    Result,
};

/// Outbound side of a chat transport.
///
/// The main bot and each report bot are separate implementations of this port.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send(&self, msg: OutgoingMessage) -> Result<MessageRef>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.send(OutgoingMessage::text(chat_id, text)).await
    }
}
