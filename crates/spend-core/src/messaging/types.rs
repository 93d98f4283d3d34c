use crate::domain::{ChatId, MessageId, SenderHandle};

/// Transport-agnostic inbound chat message.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: SenderHandle,
    pub text: String,
    /// Lower-cased command name without the leading `/` (and without `@botname`).
    pub command: Option<String>,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<MessageId>,
}

impl InboundMessage {
    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn is_command_named(&self, name: &str) -> bool {
        self.command.as_deref() == Some(name)
    }
}

/// Reply keyboard attached to an outgoing message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Keyboard {
    /// One option per row; tapping an option sends its label as text.
    Options(Vec<String>),
    /// Remove a previously shown keyboard.
    Remove,
}

#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to: None,
            keyboard: None,
        }
    }

    /// A message replying to `to` in the same chat.
    pub fn reply(to: &InboundMessage, text: impl Into<String>) -> Self {
        Self {
            chat_id: to.chat_id,
            text: text.into(),
            reply_to: Some(to.message_id),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Split a raw `/command@bot args` text into `(command, args)`.
///
/// Returns `None` when the text is not a command.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();
    if cmd.is_empty() {
        return None;
    }
    Some((cmd, rest))
}
