use std::sync::Arc;

use fixdesk_agent::{AgentRuntime, ConversationService, Services};
use fixdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use fixdesk_db::{connect_with_config, migrations, DbPool, SqlSessionRepository};
use thiserror::Error;
use tracing::info;

use crate::clients::collaborators_from_config;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ConversationService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent runtime could not be assembled: {0}")]
    Runtime(#[source] anyhow::Error),
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

    let services = Services::from_config(&config, collaborators_from_config(&config))
        .map_err(BootstrapError::Runtime)?;
    let runtime = Arc::new(AgentRuntime::new(services));
    let repository = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let service = Arc::new(ConversationService::new(repository, runtime));
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        "agent runtime assembled"
    );

    Ok(Application { config, db_pool, service })
}
