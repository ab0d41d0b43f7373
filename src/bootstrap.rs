//! Startup lifecycle: runs schema migrations before anything else binds a
//! socket. A failed migration is fatal — the process exits non-zero rather
//! than serving traffic against a schema it doesn't understand.

use sqlx::PgPool;

use crate::prelude::*;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

pub async fn run_migrations(db: &PgPool) -> Result<()> {
	let mut tx = db.begin().await?;
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS schema_migrations (name TEXT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
	)
	.execute(&mut *tx)
	.await?;

	let already_applied: Option<(String,)> =
		sqlx::query_as("SELECT name FROM schema_migrations WHERE name = $1").bind("0001_init").fetch_optional(&mut *tx).await?;

	if already_applied.is_none() {
		info!("applying migration 0001_init");
		sqlx::raw_sql(INIT_SQL).execute(&mut *tx).await.map_err(|e| {
			error!("migration 0001_init failed: {}", e);
			Error::Internal(format!("migration failed: {e}"))
		})?;
		sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)").bind("0001_init").execute(&mut *tx).await?;
	}

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
