//! Update handlers: teloxide messages in, core events out.

use teloxide::{prelude::*, types::Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use spend_core::{
    domain::{ChatId, MessageId, SenderHandle},
    messaging::types::{parse_command, InboundMessage},
    scheduler::{ReportKind, SubscriptionEvent},
};

/// Build a core message from the parts of a Telegram text message.
pub fn inbound_from_parts(
    chat_id: i64,
    message_id: i32,
    sender_id: u64,
    text: &str,
    reply_to: Option<i32>,
) -> InboundMessage {
    InboundMessage {
        chat_id: ChatId(chat_id),
        message_id: MessageId(message_id),
        sender: SenderHandle(sender_id.to_string()),
        text: text.to_string(),
        command: parse_command(text).map(|(cmd, _)| cmd),
        reply_to: reply_to.map(MessageId),
    }
}

/// `None` for anything that is not a text message from a user.
pub fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?;
    let user = msg.from()?;
    Some(inbound_from_parts(
        msg.chat.id.0,
        msg.id.0,
        user.id.0,
        text,
        msg.reply_to_message().map(|m| m.id.0),
    ))
}

/// Main bot: forward every text message to the router.
pub async fn handle_main_message(
    msg: Message,
    inbound: mpsc::Sender<InboundMessage>,
) -> ResponseResult<()> {
    let Some(inbound_msg) = to_inbound(&msg) else {
        debug!(chat_id = msg.chat.id.0, "ignoring non-text update");
        return Ok(());
    };
    if inbound.send(inbound_msg).await.is_err() {
        warn!(chat_id = msg.chat.id.0, "router is gone, dropping message");
    }
    Ok(())
}

/// `/start` sent to a report bot, as a subscription request.
pub fn subscription_from(kind: ReportKind, msg: &InboundMessage) -> Option<SubscriptionEvent> {
    if !msg.is_command_named("start") {
        return None;
    }
    Some(SubscriptionEvent {
        kind,
        sender: msg.sender.clone(),
        chat_id: msg.chat_id,
    })
}

/// Report bots only understand `/start`.
pub async fn handle_report_message(
    msg: Message,
    kind: ReportKind,
    events: mpsc::Sender<SubscriptionEvent>,
) -> ResponseResult<()> {
    let Some(event) = to_inbound(&msg).and_then(|m| subscription_from(kind, &m)) else {
        debug!(chat_id = msg.chat.id.0, %kind, "ignoring message to report bot");
        return Ok(());
    };
    if events.send(event).await.is_err() {
        warn!(chat_id = msg.chat.id.0, %kind, "scheduler is gone, dropping subscription");
    }
    Ok(())
}
