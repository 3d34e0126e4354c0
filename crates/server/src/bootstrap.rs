use std::sync::Arc;

use taskwire_core::config::{AppConfig, ConfigError, LoadOptions};
use taskwire_core::{
    AggregatorSettings, CacheTtls, CachedOptionSource, ChatTransport, Finalizer, MappingStore,
    OptionSource, RecordBuilder, SystemClock, TaskDialogService, TrackerError, UserDirectory,
};
use taskwire_db::{
    connect_with_settings, migrations, DbPool, JsonFileUserDirectory, RepositoryError,
    SqlMappingStore,
};
use taskwire_telegram::{
    default_dispatcher, PollingRunner, ReconnectPolicy, TelegramApiError, TelegramClient,
};
use thiserror::Error;
use tracing::info;

use crate::jira::JiraClient;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub bot_username: Option<String>,
    pub dialogs: Arc<TaskDialogService>,
    pub runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("user directory could not be loaded: {0}")]
    Directory(#[source] RepositoryError),
    #[error("tracker client could not be built: {0}")]
    Tracker(#[source] TrackerError),
    #[error("telegram bot could not be reached: {0}")]
    Telegram(#[source] TelegramApiError),
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

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    let directory: Arc<dyn UserDirectory> = Arc::new(
        JsonFileUserDirectory::load(&config.dialog.users_file)
            .await
            .map_err(BootstrapError::Directory)?,
    );
    let mappings: Arc<dyn MappingStore> = Arc::new(SqlMappingStore::new(db_pool.clone()));

    let jira = JiraClient::new(&config.tracker).map_err(BootstrapError::Tracker)?;
    let source: Arc<dyn OptionSource> =
        Arc::new(CachedOptionSource::new(jira, CacheTtls::default()));

    let telegram = TelegramClient::new(&config.telegram).map_err(BootstrapError::Telegram)?;
    let bot = telegram.get_me().await.map_err(BootstrapError::Telegram)?;
    info!(
        event_name = "system.bootstrap.telegram_connected",
        correlation_id = "bootstrap",
        bot_id = bot.id,
        bot_username = bot.username.as_deref().unwrap_or("unknown"),
        "telegram bot token verified"
    );

    let telegram = Arc::new(telegram);
    let transport: Arc<dyn ChatTransport> = telegram.clone();
    let builder = RecordBuilder::new(source.clone(), Arc::new(SystemClock));
    let finalizer = Finalizer::new(source, mappings, directory.clone(), transport.clone());
    let dialogs = TaskDialogService::spawn(
        builder,
        finalizer,
        transport.clone(),
        directory,
        AggregatorSettings::from_config(&config.dialog),
    );

    let runner = PollingRunner::new(
        telegram,
        transport,
        default_dispatcher(dialogs.clone()),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, db_pool, bot_username: bot.username, dialogs, runner })
}
