use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use purgebot_core::{
    config::Config,
    dispatcher::{Dispatcher as FlowDispatcher, DispatcherSettings},
    messaging::port::MessagingPort,
    ports::{ChannelSession, UserConnector},
    utils::AuditLogger,
};

use crate::{handlers, BotChannelSession, TelegramMessenger};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<FlowDispatcher>,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    connector: Arc<dyn UserConnector>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me = bot.get_me().await?;
    tracing::info!("purgebot started: @{}", me.username());
    tracing::info!("allowed users: {}", cfg.allowed_users.len());

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let bot_session: Arc<dyn ChannelSession> = Arc::new(BotChannelSession::new(bot.clone()));
    let audit = Arc::new(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));

    let dispatcher = Arc::new(FlowDispatcher::new(
        DispatcherSettings::from_config(&cfg),
        messenger,
        connector,
        bot_session,
        audit,
    ));
    let sweeper = dispatcher.spawn_idle_sweeper(SWEEP_INTERVAL);

    let state = Arc::new(AppState { dispatcher });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    sweeper.abort();
    tracing::info!("purgebot stopped");
    Ok(())
}
