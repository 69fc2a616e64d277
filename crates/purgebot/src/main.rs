use std::sync::Arc;

use purgebot_core::config::Config;
use purgebot_mtproto::LayerConnector;

#[tokio::main]
async fn main() -> Result<(), purgebot_core::Error> {
    purgebot_core::logging::init("purgebot")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        cooldown_secs = cfg.cooldown.as_secs(),
        batch_size = cfg.delete_batch_size,
        "configuration loaded"
    );

    let connector = Arc::new(LayerConnector::new());

    purgebot_telegram::router::run_polling(cfg, connector)
        .await
        .map_err(|e| purgebot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
