//! HTTP API: document CRUD, share-link rotation, folder organization,
//! code execution, and health. Every route but `/health` sits behind
//! `auth::require_auth`.

mod auth;

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::App;
use crate::documents::ShareMode;
use crate::execution::{self, JobResult, JobStatus};
use crate::gateway;
use crate::prelude::*;

use self::auth::{require_auth, CurrentUser};

pub fn router(app: App) -> Router {
	let cors = match &app.config.frontend_origin {
		Some(origin) => match origin.parse::<HeaderValue>() {
			Ok(value) => CorsLayer::new().allow_origin(value).allow_methods([Method::GET, Method::POST]).allow_headers(tower_http::cors::Any),
			Err(_) => CorsLayer::permissive(),
		},
		None => CorsLayer::permissive(),
	};

	let protected = Router::new()
		.route("/api/documents", get(list_documents).post(create_document))
		.route("/api/documents/{id}/share-link", post(rotate_share_link))
		.route("/api/folders", get(list_folders).post(create_folder))
		.route("/api/execute", post(execute))
		.route_layer(middleware::from_fn_with_state(app.clone(), require_auth));

	// The realtime handshake authenticates itself (token via header or
	// query param, since browsers can't set custom headers on the upgrade
	// request) rather than going through `require_auth`.
	let realtime = Router::new().route("/ws", get(gateway::upgrade));

	Router::new()
		.route("/health", get(health))
		.merge(protected)
		.merge(realtime)
		.layer(CompressionLayer::new())
		.layer(TraceLayer::new_for_http())
		.layer(cors)
		.with_state(app)
}

#[derive(Serialize)]
struct HealthResponse {
	status: &'static str,
	uptime_secs: u64,
	active_connections: usize,
	active_documents: usize,
	sandbox_available: bool,
	workers_active: usize,
	queue: execution::QueueCounts,
}

async fn health(State(app): State<App>) -> Json<HealthResponse> {
	let queue = app.execution.counts().await.unwrap_or(execution::QueueCounts { queued: 0, running: 0 });
	Json(HealthResponse {
		status: "ok",
		uptime_secs: app.uptime_secs(),
		active_connections: app.hubs.total_peers(),
		active_documents: app.hubs.len(),
		sandbox_available: app.sandbox.available(),
		workers_active: app.workers.active_count(),
		queue,
	})
}

async fn list_documents(State(app): State<App>, CurrentUser(user): CurrentUser) -> Result<impl axum::response::IntoResponse> {
	let docs = app.documents.list_for(&user).await?;
	Ok(Json(docs))
}

#[derive(Deserialize)]
struct CreateDocumentBody {
	title: String,
	#[serde(default)]
	initial_content: Option<String>,
}

async fn create_document(
	State(app): State<App>,
	CurrentUser(user): CurrentUser,
	Json(body): Json<CreateDocumentBody>,
) -> Result<impl axum::response::IntoResponse> {
	let initial_update = match &body.initial_content {
		Some(text) if !text.is_empty() => {
			let bytes = text.clone().into_bytes();
			Some(tokio::task::spawn_blocking(move || crate::hub::doc::initial_update(&bytes)).await??)
		}
		_ => None,
	};
	let doc = app.documents.create(&user, &body.title, initial_update.as_deref()).await?;
	Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Deserialize)]
struct ShareLinkBody {
	mode: String,
}

#[derive(Serialize)]
struct ShareLinkResponse {
	token: String,
	share_status: crate::documents::ShareStatus,
}

async fn rotate_share_link(
	State(app): State<App>,
	CurrentUser(user): CurrentUser,
	Path(id): Path<Uuid>,
	Json(body): Json<ShareLinkBody>,
) -> Result<impl axum::response::IntoResponse> {
	let mode = match body.mode.as_str() {
		"view" => ShareMode::View,
		"edit" => ShareMode::Edit,
		other => return Err(Error::Validation(format!("unknown share mode: {other}"))),
	};
	let token = app.documents.rotate_share_link(&user, id, mode).await?;
	let share_status = match mode {
		ShareMode::View => crate::documents::ShareStatus::PublicView,
		ShareMode::Edit => crate::documents::ShareStatus::PublicEdit,
	};
	Ok(Json(ShareLinkResponse { token, share_status }))
}

async fn list_folders(State(app): State<App>, CurrentUser(user): CurrentUser) -> Result<impl axum::response::IntoResponse> {
	let folders = crate::documents::list_folders(&app.db, &user).await?;
	Ok(Json(folders))
}

#[derive(Deserialize)]
struct CreateFolderBody {
	name: String,
	#[serde(default)]
	parent_folder_id: Option<Uuid>,
}

async fn create_folder(
	State(app): State<App>,
	CurrentUser(user): CurrentUser,
	Json(body): Json<CreateFolderBody>,
) -> Result<impl axum::response::IntoResponse> {
	let folder = crate::documents::create_folder(&app.db, &user, &body.name, body.parent_folder_id).await?;
	Ok((StatusCode::CREATED, Json(folder)))
}

#[derive(Deserialize)]
struct ExecuteBody {
	#[serde(default)]
	document_id: Option<Uuid>,
	language: String,
	code: String,
}

#[derive(Serialize)]
struct ExecuteResponse {
	execution_id: Uuid,
	status: JobStatus,
	output: String,
	error: Option<String>,
	execution_time_ms: u64,
}

async fn execute(
	State(app): State<App>,
	CurrentUser(user): CurrentUser,
	Json(body): Json<ExecuteBody>,
) -> Result<impl axum::response::IntoResponse> {
	let decision = app.rate_limiter.check(&user, "execute");
	if !decision.allowed {
		return Err(Error::RateLimited { retry_after_secs: decision.reset_at_secs });
	}

	if !app.sandbox.available() {
		return Err(Error::SandboxUnavailable);
	}

	let code = body.code.into_bytes();
	if code.is_empty() {
		return Err(Error::Validation("code must not be empty".into()));
	}
	if code.len() > app.config.exec_code_max_bytes {
		return Err(Error::Validation("code exceeds the maximum allowed size".into()));
	}
	if execution::Language::parse(&body.language).is_none() {
		return Err(Error::Validation(format!("unsupported language: {}", body.language)));
	}
	if execution::looks_exploitative(&code) {
		return Err(Error::Validation("code contains disallowed patterns".into()));
	}

	let job = app.execution.enqueue(&user, body.document_id, &body.language, code, app.config.exec_timeout).await?;
	app.workers.notify().await;

	let result = poll_for_result(&app, job.id, app.config.exec_timeout).await?;

	if let Some(document_id) = body.document_id {
		let hub = app.hubs.get_or_create(document_id);
		hub.publish_execute_result(job.id, std::sync::Arc::new(result.clone()));
	}

	Ok(Json(ExecuteResponse {
		execution_id: job.id,
		status: result.status,
		output: format!("{}{}", result.stdout, result.stderr),
		error: result.reason,
		execution_time_ms: result.elapsed_ms,
	}))
}

/// Polls the queue for a terminal result. `budget` bounds the wait to a
/// small multiple of the job's own timeout so a stuck worker can't hang
/// the HTTP request indefinitely.
async fn poll_for_result(app: &App, job_id: Uuid, timeout: Duration) -> Result<JobResult> {
	let deadline = tokio::time::Instant::now() + timeout + timeout;
	loop {
		if let Some((status, result)) = app.execution.result(job_id).await? {
			if !matches!(status, JobStatus::Queued | JobStatus::Running) {
				if let Some(result) = result {
					return Ok(result);
				}
			}
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(Error::ExecutionTimeout);
		}
		tokio::time::sleep(Duration::from_millis(100)).await;
	}
}

// vim: ts=4
