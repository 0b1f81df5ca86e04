use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use agenda_core::config::{AppConfig, ConfigError, LoadOptions};
use agenda_core::credentials::{PasswordHasher, TokenSigner};
use agenda_core::workflow::AppointmentWorkflow;
use agenda_db::{
    connect_with_settings, migrations, DbPool, SqlAppointmentRepository, SqlUserRepository,
};

use crate::notify::{self, mailer_from_config, MailError, MailRenderer, NotificationDispatcher};
use crate::service::{AccountService, AppointmentService};
use crate::state::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    /// Finishes once every clone of `state` has been dropped and the queue is drained.
    pub notifier: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("mail transport setup failed: {0}")]
    Mailer(#[source] MailError),
    #[error("mail templates failed to compile: {0}")]
    Templates(#[source] tera::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        enforcement = config.workflow.enforcement.as_str(),
        mail_transport = config.mail.transport.as_str(),
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

    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let appointments = Arc::new(SqlAppointmentRepository::new(db_pool.clone()));

    let mailer = mailer_from_config(&config.mail).map_err(BootstrapError::Mailer)?;
    let renderer = MailRenderer::new().map_err(BootstrapError::Templates)?;
    let dispatcher = NotificationDispatcher::new(
        users.clone(),
        renderer,
        mailer,
        config.mail.from_address.clone(),
    );
    let (publisher, notifier) = notify::spawn(dispatcher, config.mail.queue_capacity);

    let accounts = AccountService::new(
        users,
        PasswordHasher::new(config.auth.password_hash_rounds),
        TokenSigner::new(config.auth.token_secret.clone(), config.auth.token_ttl_secs),
    );
    let appointments = AppointmentService::new(
        appointments,
        AppointmentWorkflow::new(config.workflow.enforcement),
        Arc::new(publisher),
    );

    Ok(Application {
        config,
        db_pool,
        state: AppState::new(accounts, appointments),
        notifier,
    })
}

#[cfg(test)]
mod tests {
    use agenda_core::config::{ConfigOverrides, LoadOptions, MailTransport};
    use agenda_core::workflow::EnforcementPolicy;

    use crate::bootstrap::{bootstrap, Application};

    fn overrides(token_secret: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                token_secret: token_secret.map(str::to_string),
                mail_transport: Some(MailTransport::Disabled),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_token_secret() {
        let result = bootstrap(overrides(None)).await;

        let message = result.err().expect("missing secret must fail").to_string();
        assert!(message.contains("auth.token_secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_schema_and_wires_services() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                enforcement: Some(EnforcementPolicy::Strict),
                ..overrides(Some("bootstrap-test-secret-value")).overrides
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('app_user', 'appointment')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should be queryable after bootstrap");
        assert_eq!(table_count, 2);

        assert_eq!(app.state.appointments.workflow().policy(), EnforcementPolicy::Strict);

        let friends = app.state.accounts.friends("bootstrap-test").await.expect("friends");
        assert!(friends.is_empty());

        let Application { state, notifier, db_pool, .. } = app;
        drop(state);
        notifier.await.expect("dispatcher stops once publishers are gone");
        db_pool.close().await;
    }
}
