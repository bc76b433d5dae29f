//! Connection pool and schema migrations.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::domain::foundation::{DomainError, ErrorCode};

/// Opens the pool described by `config`.
///
/// Every connection gets a `statement_timeout` so a stuck query cannot pin
/// a scheduler sweep or webhook forever.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    let statement_timeout_ms = config.statement_timeout().as_millis();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {}", statement_timeout_ms).as_str())
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to connect to database: {}", e),
            )
        })?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool created"
    );
    Ok(pool)
}

/// Applies the embedded migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DomainError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Failed to run migrations: {}", e),
        )
    })?;
    info!("Database migrations complete");
    Ok(())
}

/// Maps a sqlx error, turning a violation of `constraint` into a conflict.
pub(crate) fn map_write_error(e: sqlx::Error, constraint: &str, action: &str) -> DomainError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.constraint() == Some(constraint) {
            return DomainError::conflict(format!("Failed to {}: {}", action, db_err.message()))
                .with_detail("constraint", constraint);
        }
    }
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, e))
}

pub(crate) fn read_error(e: sqlx::Error, action: &str) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, e))
}

pub(crate) fn corrupt(field: &str, e: impl std::fmt::Display) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Invalid {} value: {}", field, e))
}
