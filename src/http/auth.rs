//! Bearer-token enforcement for the HTTP API. A missing `Authorization`
//! header is a 401; a header that fails verification is a 403 — the two
//! are distinguished at the wire, matching how this API documents itself
//! to clients, even though internally both failure modes stem from the
//! same `Auth Verifier`.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{request::Parts, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app::App;
use crate::prelude::*;

#[derive(Clone, Debug)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
	type Rejection = Response;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
		parts.extensions.get::<CurrentUser>().cloned().ok_or_else(|| {
			(StatusCode::UNAUTHORIZED, Json(json!({"code": "E-UNAUTHENTICATED", "message": "authentication required"})))
				.into_response()
		})
	}
}

fn unauthenticated() -> Response {
	(StatusCode::UNAUTHORIZED, Json(json!({"code": "E-UNAUTHENTICATED", "message": "authentication required"})))
		.into_response()
}

fn invalid_token() -> Response {
	(StatusCode::FORBIDDEN, Json(json!({"code": "E-FORBIDDEN", "message": "invalid or expired token"})))
		.into_response()
}

pub async fn require_auth(State(app): State<App>, mut req: Request, next: Next) -> Response {
	let header = req.headers().get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
	let Some(token) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
		return unauthenticated();
	};

	match app.auth.verify(token).await {
		Ok(claims) => {
			if let Err(e) = crate::users::upsert(&app.db, &claims.sub, &crate::users::Profile::from(&claims)).await {
				warn!("user directory upsert failed for {}: {}", claims.sub, e);
			}
			req.extensions_mut().insert(CurrentUser(claims.user_id()));
			next.run(req).await
		}
		Err(_) => invalid_token(),
	}
}

// vim: ts=4
