use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::prelude::*;
use crate::types::UserId;
use crate::update_log;

use super::share_link::{self, ShareMode};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
	Private,
	Restricted,
	PublicView,
	PublicEdit,
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
	pub id: Uuid,
	pub title: String,
	pub owner_user_id: String,
	pub share_status: ShareStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub archived: bool,
}

pub struct DocumentStore {
	db: PgPool,
}

impl DocumentStore {
	pub fn new(db: PgPool) -> Self {
		DocumentStore { db }
	}

	pub fn pool(&self) -> &PgPool {
		&self.db
	}

	pub async fn list_for(&self, user: &UserId) -> Result<Vec<Document>> {
		let rows = sqlx::query_as::<_, (Uuid, String, String, ShareStatus, DateTime<Utc>, DateTime<Utc>, bool)>(
			"SELECT d.id, d.title, d.owner_user_id, d.share_status, d.created_at, d.updated_at, d.archived
			 FROM documents d
			 JOIN document_members m ON m.document_id = d.id
			 WHERE m.user_id = $1 AND d.archived = false
			 ORDER BY d.updated_at DESC",
		)
		.bind(&user.0)
		.fetch_all(&self.db)
		.await?;
		Ok(rows
			.into_iter()
			.map(|(id, title, owner_user_id, share_status, created_at, updated_at, archived)| Document {
				id,
				title,
				owner_user_id,
				share_status,
				created_at,
				updated_at,
				archived,
			})
			.collect())
	}

	/// Atomically creates the document, its `document_state` row, the
	/// owner membership, and — if `initial_update` is supplied — writes it
	/// as sequence 1, all in one transaction.
	pub async fn create(
		&self,
		owner: &UserId,
		title: &str,
		initial_update: Option<&[u8]>,
	) -> Result<Document> {
		if title.trim().is_empty() {
			return Err(Error::Validation("title must not be empty".into()));
		}
		let mut tx = self.db.begin().await?;
		let id = Uuid::new_v4();

		let row = sqlx::query_as::<_, (Uuid, String, String, ShareStatus, DateTime<Utc>, DateTime<Utc>, bool)>(
			"INSERT INTO documents (id, title, owner_user_id, share_status)
			 VALUES ($1, $2, $3, 'private')
			 RETURNING id, title, owner_user_id, share_status, created_at, updated_at, archived",
		)
		.bind(id)
		.bind(title)
		.bind(&owner.0)
		.fetch_one(&mut *tx)
		.await?;

		sqlx::query(
			"INSERT INTO document_state (document_id, latest_snapshot_seq, latest_snapshot_key, latest_update_seq)
			 VALUES ($1, 0, NULL, 0)",
		)
		.bind(id)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			"INSERT INTO document_members (document_id, user_id, role) VALUES ($1, $2, 'owner')",
		)
		.bind(id)
		.bind(&owner.0)
		.execute(&mut *tx)
		.await?;

		if let Some(bytes) = initial_update {
			update_log::append_in_tx(&mut tx, id, Some(owner), bytes).await?;
		}

		tx.commit().await?;

		Ok(Document {
			id: row.0,
			title: row.1,
			owner_user_id: row.2,
			share_status: row.3,
			created_at: row.4,
			updated_at: row.5,
			archived: row.6,
		})
	}

	pub async fn role_of(&self, user: &UserId, document_id: Uuid) -> Result<Option<Role>> {
		let row = sqlx::query_as::<_, (String,)>(
			"SELECT role FROM document_members WHERE document_id = $1 AND user_id = $2",
		)
		.bind(document_id)
		.bind(&user.0)
		.fetch_optional(&self.db)
		.await?;
		match row {
			Some((role,)) => Ok(Some(role.parse()?)),
			None => Ok(None),
		}
	}

	/// Owner-only. Generates a fresh token, stores only its hash, and
	/// invalidates any previous token by overwriting it in the same
	/// statement.
	pub async fn rotate_share_link(&self, owner: &UserId, document_id: Uuid, mode: ShareMode) -> Result<String> {
		let role = self.role_of(owner, document_id).await?;
		if role != Some(Role::Owner) {
			return Err(Error::Forbidden);
		}

		let token = share_link::generate_token();
		let hash = share_link::hash_token(&token);
		let share_status = match mode {
			ShareMode::View => ShareStatus::PublicView,
			ShareMode::Edit => ShareStatus::PublicEdit,
		};

		let updated = sqlx::query(
			"UPDATE documents SET share_status = $2, share_link_hash = $3, updated_at = now()
			 WHERE id = $1",
		)
		.bind(document_id)
		.bind(share_status)
		.bind(&hash)
		.execute(&self.db)
		.await?;
		if updated.rows_affected() == 0 {
			return Err(Error::NotFound);
		}

		Ok(token)
	}

	/// Compares the presented token's hash against the stored hash in
	/// constant time; returns the granted role, or `None` if the token
	/// doesn't match or the document has no active share link.
	pub async fn resolve_share_link(&self, document_id: Uuid, presented_token: &str) -> Result<Option<Role>> {
		let row = sqlx::query_as::<_, (Option<String>, ShareStatus)>(
			"SELECT share_link_hash, share_status FROM documents WHERE id = $1",
		)
		.bind(document_id)
		.fetch_optional(&self.db)
		.await?
		.ok_or(Error::NotFound)?;

		let (Some(stored_hash), share_status) = row else {
			return Ok(None);
		};
		let presented_hash = share_link::hash_token(presented_token);
		if !share_link::constant_time_eq(&stored_hash, &presented_hash) {
			return Ok(None);
		}

		Ok(match share_status {
			ShareStatus::PublicView => Some(Role::Viewer),
			ShareStatus::PublicEdit => Some(Role::Editor),
			_ => None,
		})
	}

	/// Effective role: membership takes precedence; falls back to the
	/// presented share token, matching the authorization rule in the
	/// document store contract.
	pub async fn effective_role(
		&self,
		user: Option<&UserId>,
		document_id: Uuid,
		share_token: Option<&str>,
	) -> Result<Option<Role>> {
		if let Some(user) = user {
			if let Some(role) = self.role_of(user, document_id).await? {
				return Ok(Some(role));
			}
		}
		if let Some(token) = share_token {
			return self.resolve_share_link(document_id, token).await;
		}
		Ok(None)
	}
}

// vim: ts=4
