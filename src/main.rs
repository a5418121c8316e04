use amazon_stock_tracker::bot::{self, CommandDispatcher};
use amazon_stock_tracker::cache::CachedPageFetcher;
use amazon_stock_tracker::config::AppConfig;
use amazon_stock_tracker::db::{self, PgProductStore};
use amazon_stock_tracker::errors::error_logging;
use amazon_stock_tracker::fetcher::{HttpPageFetcher, PageFetcher};
use amazon_stock_tracker::localization::LocalizationManager;
use amazon_stock_tracker::notifier::{Notifier, TelegramNotifier};
use amazon_stock_tracker::observability::{self, HealthState};
use amazon_stock_tracker::scheduler::PollScheduler;
use amazon_stock_tracker::store::ProductStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().inspect_err(|e| {
        error_logging::log_config_error(e, "environment", "load_config");
    })?;
    config.validate().inspect_err(|e| {
        error_logging::log_config_error(e, "environment", "validate_config");
    })?;

    observability::init_tracing(&config.observability)?;
    let metrics = observability::init_metrics(&config.observability)?;

    info!("{}", config.summary());

    let pool = db::connect_with_retry(&config.database).await?;

    observability::start_health_server(
        config.server.health_port,
        HealthState {
            db_pool: Some(pool.clone()),
            metrics,
        },
    )
    .await
    .context("Failed to start health server")?;

    let store: Arc<dyn ProductStore> = Arc::new(PgProductStore::new(pool));
    let fetcher: Arc<dyn PageFetcher> = Arc::new(CachedPageFetcher::new(
        Arc::new(HttpPageFetcher::new(&config.fetcher)?),
        config.fetcher.cache_ttl(),
    ));
    let localization = Arc::new(LocalizationManager::new()?);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.bot.http_timeout_secs))
        .build()
        .context("Failed to create Telegram HTTP client")?;
    let bot = Bot::with_client(config.bot.token.clone(), client);

    if let Err(e) = bot.set_my_commands(bot::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone(), Arc::clone(&localization)));

    let shutdown = CancellationToken::new();
    let scheduler = Arc::new(PollScheduler::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        notifier,
        config.scheduler.clone(),
    ));
    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let dispatcher = Arc::new(CommandDispatcher::new(
        store,
        fetcher,
        localization,
        &config.rate_limit,
        config.scheduler.poll_interval_secs,
    ));

    info!(
        timeout_secs = config.bot.http_timeout_secs,
        "Bot initialized, starting dispatcher"
    );

    let handler = dptree::entry().branch(Update::filter_message().endpoint({
        let dispatcher = Arc::clone(&dispatcher);
        move |bot: Bot, msg: Message| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { bot::message_handler(bot, msg, dispatcher).await }
        }
    }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, waiting for the poll scheduler");
    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Poll scheduler task ended abnormally");
    }

    Ok(())
}
