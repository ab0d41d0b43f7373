//! Realtime collaboration hub: CRDT document sync, durable ordering,
//! snapshot compaction, presence relay, and sandboxed code execution for
//! a multi-user code editor.

pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod documents;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod hub;
pub mod http;
pub mod prelude;
pub mod rate_limit;
pub mod snapshot;
pub mod types;
pub mod update_log;
pub mod users;

use std::time::Duration;

use crate::app::{App, AppState};
use crate::config::Config;
use crate::prelude::*;

/// Builds the application context, runs migrations, and returns a ready
/// `App` plus the background tasks that keep it healthy over time. Split
/// out from `main` so integration tests can drive the same startup path
/// against a test database.
pub async fn bootstrap() -> Result<App> {
	let config = Config::from_env()?;
	let app = AppState::build(config).await?;
	bootstrap::run_migrations(&app.db).await?;
	spawn_background_tasks(app.clone());
	Ok(app)
}

fn spawn_background_tasks(app: App) {
	let idle_evict = app.clone();
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(Duration::from_secs(60));
		loop {
			interval.tick().await;
			idle_evict.hubs.evict_idle(Duration::from_secs(600));
		}
	});

	let gc = app.clone();
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(Duration::from_secs(30));
		loop {
			interval.tick().await;
			if let Err(e) = gc.execution.gc().await {
				warn!("execution job gc failed: {}", e);
			}
		}
	});
}

// vim: ts=4
