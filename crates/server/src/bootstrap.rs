use std::sync::Arc;

use conduit_agent::{RuntimeService, ServiceError, SupervisorError};
use conduit_core::config::{AppConfig, ConfigError};
use conduit_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<RuntimeService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("runtime service setup failed: {0}")]
    Service(#[from] ServiceError),
    #[error("runtime autostart failed: {0}")]
    Autostart(#[source] SupervisorError),
}

#[cfg(test)]
pub async fn bootstrap(
    options: conduit_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        mode = config.channel.mode.as_str(),
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

    let service = Arc::new(RuntimeService::from_config(&config, db_pool.clone())?);

    if config.runtime.autostart && !service.is_direct() {
        service.start_runtime().await.map_err(BootstrapError::Autostart)?;
        info!(
            event_name = "system.bootstrap.runtime_started",
            correlation_id = "bootstrap",
            "supervised runtime started"
        );
    }

    Ok(Application { config, db_pool, service })
}
