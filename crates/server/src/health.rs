use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use otvet_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

/// Readiness report: the responder is only useful when the database is
/// reachable and its schema matches the embedded migrations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub database: DatabaseHealth,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: "otvet-server",
        version: env!("CARGO_PKG_VERSION"),
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> DatabaseHealth {
    let expected = migrations::MIGRATOR.iter().map(|m| m.version).max();

    let applied = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await;

    match applied {
        Ok(applied) if applied == expected => {
            DatabaseHealth { status: "ready", schema_version: applied, detail: None }
        }
        Ok(applied) => DatabaseHealth {
            status: "degraded",
            schema_version: applied,
            detail: Some(format!(
                "schema at {applied:?}, embedded migrations expect {expected:?}"
            )),
        },
        Err(error) => DatabaseHealth {
            status: "degraded",
            schema_version: None,
            detail: Some(format!("database query failed: {error}")),
        },
    }
}
