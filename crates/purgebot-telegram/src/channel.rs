use async_trait::async_trait;
use teloxide::{prelude::*, types::UserId, ApiError, RequestError};
use tokio::sync::OnceCell;

use purgebot_core::{
    domain::{ChannelTarget, Permissions},
    errors::{DeleteError, Error},
    ports::{ChannelSession, MessageCursor, SessionCapabilities},
    Result,
};

use crate::TelegramMessenger;

/// The bot's own account acting on a channel.
///
/// The Bot API cannot enumerate channel history and deletes one message per
/// request, so flows using this session fall back to the id-range strategy.
/// The session is shared by every admin flow; `disconnect` does nothing.
pub struct BotChannelSession {
    bot: Bot,
    me: OnceCell<UserId>,
}

impl BotChannelSession {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            me: OnceCell::new(),
        }
    }

    async fn my_id(&self) -> Result<UserId> {
        self.me
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await.map_err(|e| {
                    Error::External(format!("get_me failed: {e}"))
                })?;
                Ok(me.user.id)
            })
            .await
            .copied()
    }
}

fn tg_chat(id: i64) -> teloxide::types::ChatId {
    TelegramMessenger::tg_chat(purgebot_core::domain::ChatId(id))
}

fn access_error(e: RequestError) -> Error {
    match e {
        RequestError::Api(ApiError::ChatNotFound) => {
            Error::ChannelAccess("channel not found, or the bot is not a member".to_string())
        }
        other => Error::ChannelAccess(other.to_string()),
    }
}

pub(crate) fn delete_error(e: RequestError) -> DeleteError {
    match e {
        RequestError::RetryAfter(d) => DeleteError::FloodWait(d),
        other => DeleteError::Other(other.to_string()),
    }
}

#[async_trait]
impl ChannelSession for BotChannelSession {
    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            can_list_history: false,
            max_batch_size: 1,
        }
    }

    async fn resolve_channel(&self, id: i64) -> Result<ChannelTarget> {
        let chat = self.bot.get_chat(tg_chat(id)).await.map_err(access_error)?;
        if !chat.is_channel() && !chat.is_supergroup() {
            return Err(Error::ChannelAccess(format!("{id} is not a channel")));
        }
        Ok(ChannelTarget::new(id, chat.title().map(str::to_string)))
    }

    async fn list_messages(&self, _channel: &ChannelTarget) -> Result<Box<dyn MessageCursor>> {
        Err(Error::Unsupported(
            "the Bot API cannot list channel history".to_string(),
        ))
    }

    async fn delete_messages(
        &self,
        channel: &ChannelTarget,
        ids: &[i32],
        _permanent: bool,
    ) -> std::result::Result<(), DeleteError> {
        // Bot deletions are always for everyone.
        for id in ids {
            self.bot
                .delete_message(tg_chat(channel.id), teloxide::types::MessageId(*id))
                .await
                .map_err(delete_error)?;
        }
        Ok(())
    }

    async fn get_own_permissions(&self, channel: &ChannelTarget) -> Result<Permissions> {
        let me = self.my_id().await?;
        let member = self
            .bot
            .get_chat_member(tg_chat(channel.id), me)
            .await
            .map_err(access_error)?;
        let perms = Permissions {
            is_admin: member.kind.is_privileged(),
            can_delete: member.kind.can_delete_messages(),
        };
        tracing::debug!(channel = channel.id, ?perms, "bot permissions");
        Ok(perms)
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn retry_after_maps_to_flood_wait() {
        let e = delete_error(RequestError::RetryAfter(Duration::from_secs(17)));
        assert_eq!(e, DeleteError::FloodWait(Duration::from_secs(17)));
    }

    #[test]
    fn other_api_errors_are_counted_failures() {
        let e = delete_error(RequestError::Api(ApiError::MessageToDeleteNotFound));
        assert!(matches!(e, DeleteError::Other(_)));
    }
}
