//! Error taxonomy. A single `Error` enum, mapped to stable codes and HTTP
//! statuses at the edge, following the rest of the codebase's convention of
//! centralizing all fallible conversions here rather than scattering
//! `map_err` closures through handlers.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::prelude::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Resource does not exist, or the caller lacks even the right to learn
	/// that it exists.
	NotFound,
	/// Resource exists, caller is authenticated, but lacks the membership
	/// role required for the operation.
	Forbidden,
	/// No credentials presented, or credentials failed verification.
	Unauthenticated,
	/// Malformed or semantically invalid request body/params.
	Validation(String),
	/// A precondition on current state was violated (stale share-link
	/// revision, duplicate membership, etc).
	Conflict(String),
	/// Rate limit exceeded; carries the number of seconds until retry.
	RateLimited { retry_after_secs: u64 },
	/// No sandbox runner capacity/engine reachable at enqueue time.
	SandboxUnavailable,
	/// A submitted execution job ran past its wall-clock budget.
	ExecutionTimeout,
	/// A submitted execution job exceeded its output byte budget.
	OutputLimit,
	/// A downstream dependency (database, object store, docker engine)
	/// failed in a way that is expected to be transient.
	Transient(String),
	/// An invariant the system is supposed to maintain was found broken
	/// (gap in update log sequence, snapshot pointer present but
	/// unreadable, etc). Always a bug or an operational incident, never a
	/// client mistake.
	InconsistentState(String),
	/// Catch-all for everything else.
	Internal(String),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorResponse {
	code: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	retry_after: Option<u64>,
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, code, message, retry_after) = match self {
			Error::NotFound => (StatusCode::NOT_FOUND, "E-NOTFOUND", "resource not found".to_string(), None),
			Error::Forbidden => {
				(StatusCode::FORBIDDEN, "E-FORBIDDEN", "you do not have access to this resource".to_string(), None)
			}
			Error::Unauthenticated => {
				(StatusCode::UNAUTHORIZED, "E-UNAUTHENTICATED", "authentication required".to_string(), None)
			}
			Error::Validation(msg) => (StatusCode::BAD_REQUEST, "E-VALIDATION", msg, None),
			Error::Conflict(msg) => (StatusCode::CONFLICT, "E-CONFLICT", msg, None),
			Error::RateLimited { retry_after_secs } => (
				StatusCode::TOO_MANY_REQUESTS,
				"E-RATE-LIMITED",
				"rate limit exceeded".to_string(),
				Some(retry_after_secs),
			),
			Error::SandboxUnavailable => (
				StatusCode::SERVICE_UNAVAILABLE,
				"E-SANDBOX-UNAVAILABLE",
				"no execution capacity available".to_string(),
				None,
			),
			Error::ExecutionTimeout => {
				(StatusCode::OK, "E-EXECUTION-TIMEOUT", "execution exceeded its time limit".to_string(), None)
			}
			Error::OutputLimit => {
				(StatusCode::OK, "E-OUTPUT-LIMIT", "execution output exceeded the byte limit".to_string(), None)
			}
			Error::Transient(msg) => {
				warn!("transient error: {}", msg);
				(StatusCode::SERVICE_UNAVAILABLE, "E-TRANSIENT", "temporarily unavailable, retry".to_string(), Some(5))
			}
			Error::InconsistentState(msg) => {
				error!("inconsistent state: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "E-INCONSISTENT-STATE", "internal server error".to_string(), None)
			}
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "E-INTERNAL", "internal server error".to_string(), None)
			}
		};

		let body = ErrorResponse { code: code.to_string(), message, retry_after };
		(status, Json(body)).into_response()
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::RowNotFound => Error::NotFound,
			other => {
				warn!("sqlx error: {}", other);
				Error::Transient("database".into())
			}
		}
	}
}

impl From<jsonwebtoken::errors::Error> for Error {
	fn from(err: jsonwebtoken::errors::Error) -> Self {
		warn!("jwt error: {}", err);
		Error::Unauthenticated
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Error::Validation("malformed JSON".into())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		warn!("join error: {}", err);
		Error::Internal("background task panicked".into())
	}
}

impl From<object_store::Error> for Error {
	fn from(err: object_store::Error) -> Self {
		warn!("object store error: {}", err);
		Error::Transient("blob storage".into())
	}
}

impl From<bollard::errors::Error> for Error {
	fn from(err: bollard::errors::Error) -> Self {
		warn!("container engine error: {}", err);
		Error::SandboxUnavailable
	}
}

impl From<hyper_util::client::legacy::Error> for Error {
	fn from(err: hyper_util::client::legacy::Error) -> Self {
		warn!("http client error: {}", err);
		Error::Transient("jwks fetch".into())
	}
}

/// Helper macro for locking a sync mutex and converting poisoning into
/// `Error::InconsistentState`, matching the crate's non-panicking policy
/// around lock poisoning.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::InconsistentState("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::InconsistentState(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
