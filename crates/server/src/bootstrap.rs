use std::sync::Arc;
use std::time::Duration;

use summarybot_agent::{LlmError, LlmSummarizer, OpenAiCompatibleClient, Summarizer};
use summarybot_core::config::{AppConfig, ConfigError, LoadOptions};
use summarybot_db::{
    connect_with_config, migrations, DbPool, SqlSubscriptionRepository, SubscriptionStore,
};
use summarybot_mattermost::{
    ChannelMessageHandler, ChatApiError, ChatTransport, DialogStates, DirectMessageHandler,
    EventDispatcher, EventStreamRunner, MattermostClient, MattermostSocketTransport,
    ReconnectPolicy,
};
use summarybot_scheduler::{DeliveryPipeline, SchedulerLoop};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: SubscriptionStore,
    pub scheduler: SchedulerLoop,
    pub event_runner: EventStreamRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("chat client could not be built: {0}")]
    ChatClient(#[from] ChatApiError),
    #[error("llm client could not be built: {0}")]
    LlmClient(#[from] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = SubscriptionStore::new(
        Arc::new(SqlSubscriptionRepository::new(db_pool.clone())),
        config.scheduler.fallback_timezone(),
    );
    let chat: Arc<dyn ChatTransport> = Arc::new(MattermostClient::from_config(&config.mattermost)?);
    let summarizer: Arc<dyn Summarizer> =
        Arc::new(LlmSummarizer::new(OpenAiCompatibleClient::from_config(&config.llm)?));
    let bot_username = config.mattermost.bot_username.clone();

    let dialogs = Arc::new(DialogStates::new(Duration::from_secs(config.scheduler.dialog_ttl_secs)));
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(DirectMessageHandler::new(
        Arc::clone(&chat),
        store.clone(),
        dialogs,
        bot_username.clone(),
    ));
    dispatcher.register(ChannelMessageHandler::new(Arc::clone(&chat), Arc::clone(&summarizer)));

    let event_runner = EventStreamRunner::new(
        Arc::new(MattermostSocketTransport::from_config(&config.mattermost)),
        dispatcher,
        ReconnectPolicy::from_config(&config.mattermost),
    );

    let pipeline = DeliveryPipeline::new(store.clone(), chat, summarizer, bot_username);
    let scheduler = SchedulerLoop::new(
        store.clone(),
        pipeline,
        Duration::from_secs(config.scheduler.poll_interval_secs),
    );

    info!(
        event_name = "system.bootstrap.components_ready",
        correlation_id = "bootstrap",
        poll_interval_secs = config.scheduler.poll_interval_secs,
        "chat transport, summarizer and scheduler assembled"
    );

    Ok(Application { config, db_pool, store, scheduler, event_runner })
}
