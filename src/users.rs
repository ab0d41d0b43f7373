//! User Directory: upserts identity records keyed by external subject id.
//!
//! Grounded on `adapters/meta-adapter-sqlite/src/file_user_data.rs`'s
//! `INSERT ... ON CONFLICT DO UPDATE` idiom for idempotent upserts, adapted
//! from sqlite's `unixepoch()`/`?` placeholders to Postgres's `now()`/`$n`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::prelude::*;

/// A user's mutable profile fields, as extracted from verified token claims.
#[derive(Debug, Clone, Default)]
pub struct Profile {
	pub email: Option<String>,
	pub name: Option<String>,
	pub avatar_url: Option<String>,
}

impl From<&crate::auth::Claims> for Profile {
	fn from(claims: &crate::auth::Claims) -> Self {
		Profile { email: claims.email.clone(), name: claims.name.clone(), avatar_url: claims.picture.clone() }
	}
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
	pub id: Uuid,
	pub subject: String,
	pub email: Option<String>,
	pub name: Option<String>,
	pub avatar_url: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Upserts a user record keyed on `subject`, the stable external identifier
/// from the verified token. Idempotent: a repeat call with the same subject
/// updates the mutable profile fields and returns the same internal id,
/// matching the "created on first verification, mutated by re-auth" data
/// model contract.
pub async fn upsert(db: &PgPool, subject: &str, profile: &Profile) -> Result<User> {
	let user = sqlx::query_as::<_, User>(
		"INSERT INTO users (id, subject, email, name, avatar_url, created_at, updated_at)
		 VALUES ($1, $2, $3, $4, $5, now(), now())
		 ON CONFLICT (subject) DO UPDATE SET
		   email = excluded.email,
		   name = excluded.name,
		   avatar_url = excluded.avatar_url,
		   updated_at = now()
		 RETURNING id, subject, email, name, avatar_url, created_at, updated_at",
	)
	.bind(Uuid::new_v4())
	.bind(subject)
	.bind(&profile.email)
	.bind(&profile.name)
	.bind(&profile.avatar_url)
	.fetch_one(db)
	.await?;
	Ok(user)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[sqlx::test]
	async fn upsert_is_idempotent_on_subject(pool: PgPool) {
		let first = upsert(&pool, "sub-1", &Profile { email: Some("a@example.com".into()), name: None, avatar_url: None })
			.await
			.unwrap();

		let second = upsert(
			&pool,
			"sub-1",
			&Profile { email: Some("b@example.com".into()), name: Some("B".into()), avatar_url: None },
		)
		.await
		.unwrap();

		assert_eq!(first.id, second.id);
		assert_eq!(second.email.as_deref(), Some("b@example.com"));
		assert_eq!(second.name.as_deref(), Some("B"));
	}

	#[sqlx::test]
	async fn distinct_subjects_get_distinct_ids(pool: PgPool) {
		let a = upsert(&pool, "sub-a", &Profile::default()).await.unwrap();
		let b = upsert(&pool, "sub-b", &Profile::default()).await.unwrap();
		assert_ne!(a.id, b.id);
	}
}

// vim: ts=4
