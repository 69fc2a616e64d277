//! Telegram update handlers.
//!
//! Each handler converts a teloxide update into the core `IncomingUpdate`
//! and hands it to the dispatcher.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use purgebot_core::{
    domain::{ChatId, UserId},
    messaging::types::{Command, IncomingUpdate, TextMessage},
};

use crate::router::AppState;

/// Command name, lowercase. Telegram may send `/cmd@botname arg1 ...`;
/// arguments are ignored.
pub(crate) fn parse_command(text: &str) -> String {
    let first = text.split_whitespace().next().unwrap_or("");
    first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

fn to_update(msg: &Message) -> Option<IncomingUpdate> {
    let user = msg.from()?;
    let text = msg.text()?;

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = UserId(user.id.0 as i64);
    let username = user.username.clone();

    if text.starts_with('/') {
        return Some(IncomingUpdate::Command(Command {
            chat_id,
            user_id,
            username,
            name: parse_command(text),
        }));
    }

    Some(IncomingUpdate::Text(TextMessage {
        chat_id,
        user_id,
        username,
        text: text.to_string(),
    }))
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Credentials are only ever collected in a private chat.
    if !msg.chat.is_private() {
        return Ok(());
    }

    let Some(update) = to_update(&msg) else {
        if msg.from().is_some() {
            let _ = bot
                .send_message(msg.chat.id, "Please reply with text. Use /start to begin.")
                .await;
        }
        return Ok(());
    };

    state.dispatcher.handle(update).await;
    Ok(())
}

/// Menu buttons carry their label as callback data; treat a press as typing it.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let _ = bot.answer_callback_query(q.id.clone()).await;

    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    let data = q.data.clone().unwrap_or_default();
    let Some(chat_id) = chat_id else {
        return Ok(());
    };
    if data.is_empty() {
        return Ok(());
    }

    let update = IncomingUpdate::Text(TextMessage {
        chat_id: ChatId(chat_id.0),
        user_id: UserId(q.from.id.0 as i64),
        username: q.from.username.clone(),
        text: data,
    });
    state.dispatcher.handle(update).await;
    Ok(())
}
