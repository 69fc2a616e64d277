use crate::domain::{ChatId, UserId};

/// Inbound update, already stripped of platform detail.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Text(TextMessage),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Command(c) => c.chat_id,
            IncomingUpdate::Text(t) => t.chat_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            IncomingUpdate::Command(c) => c.user_id,
            IncomingUpdate::Text(t) => t.user_id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            IncomingUpdate::Command(c) => c.username.as_deref(),
            IncomingUpdate::Text(t) => t.username.as_deref(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    /// Lowercase, without the leading slash or `@botname` suffix.
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
}

/// Keyboard of choices: rows of button labels, sent back verbatim as text when pressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Menu {
    pub rows: Vec<Vec<String>>,
}

impl Menu {
    /// Convenience for "one button per row" layouts.
    pub fn one_per_row(options: &[&str]) -> Self {
        Self {
            rows: options.iter().map(|o| vec![o.to_string()]).collect(),
        }
    }
}
