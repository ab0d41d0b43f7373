//! Thin folder organization layer. Folders have no bearing on
//! collaboration correctness — they exist purely so the HTTP API can group
//! documents for the client's file tree.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::prelude::*;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Folder {
	pub id: Uuid,
	pub owner_user_id: String,
	pub name: String,
	pub parent_folder_id: Option<Uuid>,
}

pub async fn list_for(db: &PgPool, user: &UserId) -> Result<Vec<Folder>> {
	let rows = sqlx::query_as::<_, Folder>(
		"SELECT id, owner_user_id, name, parent_folder_id
		 FROM folders WHERE owner_user_id = $1 ORDER BY name",
	)
	.bind(&user.0)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

pub async fn create(db: &PgPool, user: &UserId, name: &str, parent: Option<Uuid>) -> Result<Folder> {
	if name.trim().is_empty() {
		return Err(Error::Validation("folder name must not be empty".into()));
	}
	let folder = sqlx::query_as::<_, Folder>(
		"INSERT INTO folders (id, owner_user_id, name, parent_folder_id)
		 VALUES ($1, $2, $3, $4)
		 RETURNING id, owner_user_id, name, parent_folder_id",
	)
	.bind(Uuid::new_v4())
	.bind(&user.0)
	.bind(name)
	.bind(parent)
	.fetch_one(db)
	.await?;
	Ok(folder)
}

// vim: ts=4
