//! Bootstrap-owned application context. One instance is built at startup
//! and handed to every HTTP/gateway handler by reference (cloned `Arc`,
//! never a module-level singleton) — the single context object the design
//! calls for in place of scattered process-global state.

use std::sync::Arc;
use std::time::Instant;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::auth::{SharedVerifier, Verifier};
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::execution::{ExecutionQueue, SandboxRunner, WorkerPool};
use crate::hub::HubRegistry;
use crate::prelude::*;
use crate::rate_limit::{RateLimiter, SharedRateLimiter};
use crate::snapshot::SnapshotStore;
use crate::update_log::UpdateLog;

pub struct AppState {
	pub config: Config,
	pub db: PgPool,
	pub documents: DocumentStore,
	pub update_log: UpdateLog,
	pub snapshots: SnapshotStore,
	pub hubs: HubRegistry,
	pub auth: SharedVerifier,
	pub rate_limiter: SharedRateLimiter,
	pub execution: Arc<ExecutionQueue>,
	pub sandbox: Arc<SandboxRunner>,
	pub workers: WorkerPool,
	pub started_at: Instant,
}

/// Cheaply cloneable handle shared by every axum handler and gateway task.
pub type App = Arc<AppState>;

impl AppState {
	pub async fn build(config: Config) -> Result<App> {
		let db = PgPoolOptions::new()
			.max_connections(config.pg_pool_max)
			.connect(&config.database_url)
			.await
			.map_err(|e| Error::Internal(format!("failed to connect to database: {e}")))?;

		let snapshots = match &config.blob {
			Some(blob) => SnapshotStore::configured(blob)?,
			None => SnapshotStore::disabled(),
		};

		let sandbox = Arc::new(SandboxRunner::connect(config.exec_output_max_bytes).await);
		if !sandbox.available() {
			warn!("sandbox runner unavailable at startup; /api/execute will return sandbox_unavailable");
		}

		let execution = Arc::new(ExecutionQueue::new(db.clone()));
		let workers = WorkerPool::new(execution.clone(), sandbox.clone(), config.exec_max_concurrency, config.worker_idle);

		Ok(Arc::new(AppState {
			documents: DocumentStore::new(db.clone()),
			update_log: UpdateLog::new(db.clone()),
			snapshots,
			hubs: HubRegistry::new(),
			auth: Arc::new(Verifier::new(config.auth.clone())?),
			rate_limiter: Arc::new(RateLimiter::new(config.exec_rate_limit_per_min, std::time::Duration::from_secs(60))),
			execution,
			sandbox,
			workers,
			started_at: Instant::now(),
			db,
			config,
		}))
	}

	pub fn uptime_secs(&self) -> u64 {
		self.started_at.elapsed().as_secs()
	}
}

// vim: ts=4
