use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use otvet_avito::MessengerClient;
use otvet_core::config::{AppConfig, ConfigError, LoadOptions};
use otvet_core::orchestrator::Responder;
use otvet_core::policy::ReplyPolicy;
use otvet_core::retrieval::RetrievalCascade;
use otvet_core::{DeliveryPipeline, RetryPolicy};
use otvet_db::repositories::{SqlConversationStore, SqlEventLedger};
use otvet_db::{connect, migrations, DbPool};
use otvet_rag::{FileSearchClient, GeminiGenerator};
use otvet_telegram::TelegramNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub responder: Arc<Responder>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("client construction failed: {0}")]
    Client(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let messenger = MessengerClient::new(&config.avito)
        .map_err(|e| BootstrapError::Client(e.to_string()))?;
    let search = FileSearchClient::new(&config.gemini)
        .map_err(|e| BootstrapError::Client(e.to_string()))?;
    let generator = GeminiGenerator::new(&config.gemini)
        .map_err(|e| BootstrapError::Client(e.to_string()))?;
    let notifier = TelegramNotifier::new(&config.telegram)
        .map_err(|e| BootstrapError::Client(e.to_string()))?;

    let ledger = Arc::new(SqlEventLedger::new(db_pool.clone()));
    let store = Arc::new(SqlConversationStore::new(db_pool.clone()));

    let policy = ReplyPolicy::new(RetrievalCascade::new(Arc::new(search)), Arc::new(generator));
    let delivery = DeliveryPipeline::new(
        Arc::new(messenger),
        store.clone(),
        Arc::new(notifier),
        RetryPolicy {
            max_attempts: config.delivery.max_attempts,
            base_delay_ms: config.delivery.base_delay_ms,
            max_delay_ms: config.delivery.max_delay_ms,
        },
        config.avito.user_id.clone(),
    );
    let responder = Arc::new(Responder::new(
        ledger,
        store,
        policy,
        delivery,
        config.responder.context_limit,
    ));

    info!(event_name = "system.bootstrap.completed", "application wired");
    Ok(Application { config, db_pool, responder })
}

#[cfg(test)]
mod tests {
    use otvet_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_avito_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                gemini_api_key: Some("gm-key".to_string()),
                gemini_store_name: Some("otvet-docs".to_string()),
                telegram_bot_token: Some("123:abc".to_string()),
                telegram_owner_chat_id: Some("42".to_string()),
                app_base_url: Some("https://otvet.example.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("avito.client_id"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_responder() {
        let app = bootstrap(LoadOptions {
            overrides: valid_overrides("sqlite::memory:?cache=shared"),
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('processed_events', 'messages', 'dialog_records')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 3, "bootstrap should expose the responder tables");

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some(database_url.to_string()),
            avito_client_id: Some("client-1".to_string()),
            avito_client_secret: Some("secret-1".to_string()),
            avito_user_id: Some("900".to_string()),
            gemini_api_key: Some("gm-key".to_string()),
            gemini_store_name: Some("otvet-docs".to_string()),
            telegram_bot_token: Some("123:abc".to_string()),
            telegram_owner_chat_id: Some("42".to_string()),
            app_base_url: Some("https://otvet.example.com".to_string()),
            ..ConfigOverrides::default()
        }
    }
}
