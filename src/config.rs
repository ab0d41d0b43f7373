//! Typed environment configuration, loaded once at boot and validated
//! before any listener opens.

use std::time::Duration;

use crate::prelude::*;

fn env_str(key: &str) -> Option<String> {
	std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
	env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct BlobConfig {
	pub endpoint: String,
	pub region: String,
	pub bucket: String,
	pub access_key_id: String,
	pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
	pub jwks_url: Option<String>,
	pub issuer: Option<String>,
	pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub port: u16,
	pub frontend_origin: Option<String>,

	pub database_url: String,
	pub pg_pool_max: u32,
	pub db_ssl_mode: Option<String>,

	pub blob: Option<BlobConfig>,

	pub auth: AuthConfig,

	pub queue_url: Option<String>,

	pub snapshot_every_n_updates: u32,
	pub snapshot_every: Duration,
	pub prune_updates_before_snapshot: bool,

	pub exec_timeout: Duration,
	pub exec_code_max_bytes: usize,
	pub exec_output_max_bytes: usize,
	pub exec_max_concurrency: usize,
	pub exec_rate_limit_per_min: u32,
	pub worker_idle: Duration,
}

impl Config {
	/// Read configuration from the process environment. Fails closed: a
	/// missing `DATABASE_URL` is fatal since nothing in this system works
	/// without durable storage.
	pub fn from_env() -> Result<Self> {
		let database_url = env_str("DATABASE_URL")
			.ok_or_else(|| Error::Internal("DATABASE_URL is required".into()))?;

		let blob = match (
			env_str("BLOB_ENDPOINT"),
			env_str("BLOB_REGION"),
			env_str("BLOB_BUCKET"),
			env_str("BLOB_ACCESS_KEY_ID"),
			env_str("BLOB_SECRET_ACCESS_KEY"),
		) {
			(Some(endpoint), Some(region), Some(bucket), Some(access_key_id), Some(secret_access_key)) => {
				Some(BlobConfig { endpoint, region, bucket, access_key_id, secret_access_key })
			}
			(None, None, None, None, None) => {
				warn!("no BLOB_* configuration present; snapshotting disabled, full replay only");
				None
			}
			_ => {
				return Err(Error::Internal("partial BLOB_* configuration: all or none required".into()));
			}
		};

		let auth = AuthConfig {
			jwks_url: env_str("AUTH_JWKS_URL"),
			issuer: env_str("AUTH_ISSUER"),
			audience: env_str("AUTH_AUDIENCE"),
		};
		if auth.jwks_url.is_none() {
			warn!("AUTH_JWKS_URL not configured; falling back to a development-only shared secret. Do not run this in production.");
		}

		Ok(Config {
			port: env_parse("PORT", 8080),
			frontend_origin: env_str("FRONTEND_ORIGIN"),

			database_url,
			pg_pool_max: env_parse("PG_POOL_MAX", 10),
			db_ssl_mode: env_str("DB_SSL_MODE"),

			blob,
			auth,

			queue_url: env_str("QUEUE_URL"),

			snapshot_every_n_updates: env_parse("SNAPSHOT_EVERY_N_UPDATES", 50),
			snapshot_every: Duration::from_millis(env_parse("SNAPSHOT_EVERY_MS", 30_000)),
			prune_updates_before_snapshot: env_parse("PRUNE_UPDATES_BEFORE_SNAPSHOT", false),

			exec_timeout: Duration::from_millis(env_parse("EXEC_TIMEOUT_MS", 10_000)),
			exec_code_max_bytes: env_parse("EXEC_CODE_MAX_BYTES", 100_000),
			exec_output_max_bytes: env_parse("EXEC_OUTPUT_MAX_BYTES", 1_048_576),
			exec_max_concurrency: env_parse("EXEC_MAX_CONCURRENCY", 2),
			exec_rate_limit_per_min: env_parse("EXEC_RATE_LIMIT_PER_MIN", 10),
			worker_idle: Duration::from_millis(env_parse("WORKER_IDLE_MS", 30_000)),
		})
	}
}

// vim: ts=4
