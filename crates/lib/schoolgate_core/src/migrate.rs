//! Schema migrations for the `users` and `token_revocations` tables.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    debug!(known = MIGRATOR.iter().count(), "applying schema migrations");
    MIGRATOR.run(pool).await
}
