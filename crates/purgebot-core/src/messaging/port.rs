use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::Menu,
    Result,
};

/// Outbound side of the conversation with the requester.
///
/// Telegram is the only implementation; flows and the dispatcher talk to this
/// trait so they can be driven by a fake in tests.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    /// Send `text` with a one-shot keyboard of choices.
    async fn send_menu(&self, chat_id: ChatId, text: &str, menu: &Menu) -> Result<MessageRef>;
}
