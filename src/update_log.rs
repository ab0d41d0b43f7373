//! Update Log: the append-only, strictly-ordered log of CRDT update blobs
//! per document, plus the `document_state` control row each document owns.
//!
//! Sequence assignment is made atomic by folding the "bump the counter"
//! and "insert the row" into a single `UPDATE ... RETURNING` followed by
//! an `INSERT` inside one transaction — two concurrent appenders racing
//! for the same document serialize on the row lock `UPDATE` takes, so
//! neither can observe or hand out the other's sequence number.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::prelude::*;
use crate::types::UserId;

#[derive(Debug, Clone)]
pub struct UpdateEntry {
	pub seq: i64,
	pub actor_user_id: Option<String>,
	pub data: Vec<u8>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentState {
	pub latest_snapshot_seq: i64,
	pub latest_snapshot_key: Option<String>,
	pub latest_update_seq: i64,
}

pub struct UpdateLog {
	db: PgPool,
}

impl UpdateLog {
	pub fn new(db: PgPool) -> Self {
		UpdateLog { db }
	}

	pub async fn state(&self, document_id: Uuid) -> Result<DocumentState> {
		let row = sqlx::query_as::<_, (i64, Option<String>, i64)>(
			"SELECT latest_snapshot_seq, latest_snapshot_key, latest_update_seq
			 FROM document_state WHERE document_id = $1",
		)
		.bind(document_id)
		.fetch_optional(&self.db)
		.await?
		.ok_or(Error::NotFound)?;
		Ok(DocumentState { latest_snapshot_seq: row.0, latest_snapshot_key: row.1, latest_update_seq: row.2 })
	}

	/// Entries with sequence strictly greater than `after_seq`, ascending.
	pub async fn tail(&self, document_id: Uuid, after_seq: i64) -> Result<Vec<UpdateEntry>> {
		let rows = sqlx::query_as::<_, (i64, Option<String>, Vec<u8>, DateTime<Utc>)>(
			"SELECT seq, actor_user_id, update_bytes, created_at
			 FROM document_updates
			 WHERE document_id = $1 AND seq > $2
			 ORDER BY seq ASC",
		)
		.bind(document_id)
		.bind(after_seq)
		.fetch_all(&self.db)
		.await?;
		Ok(rows
			.into_iter()
			.map(|(seq, actor_user_id, data, created_at)| UpdateEntry { seq, actor_user_id, data, created_at })
			.collect())
	}

	/// Atomically assigns the next sequence number for `document_id` and
	/// persists `data`. Fails with `NotFound` if the document has no
	/// `document_state` row (i.e. does not exist).
	pub async fn append(&self, document_id: Uuid, actor: Option<&UserId>, data: &[u8]) -> Result<i64> {
		let mut tx = self.db.begin().await?;
		let seq = append_in_tx(&mut tx, document_id, actor, data).await?;
		tx.commit().await?;
		Ok(seq)
	}

	/// Advances the snapshot pointer. When `prune` is set, entries with
	/// sequence `<= seq` are deleted — trading history for storage, per
	/// the caller's configured retention policy.
	pub async fn snapshot_mark(&self, document_id: Uuid, seq: i64, object_key: &str, prune: bool) -> Result<()> {
		let mut tx = self.db.begin().await?;
		let updated = sqlx::query(
			"UPDATE document_state SET latest_snapshot_seq = $2, latest_snapshot_key = $3
			 WHERE document_id = $1 AND latest_snapshot_seq < $2",
		)
		.bind(document_id)
		.bind(seq)
		.bind(object_key)
		.execute(&mut *tx)
		.await?;
		if updated.rows_affected() == 0 {
			// A newer snapshot already won the race; nothing to do.
			tx.rollback().await?;
			return Ok(());
		}
		if prune {
			sqlx::query("DELETE FROM document_updates WHERE document_id = $1 AND seq <= $2")
				.bind(document_id)
				.bind(seq)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}
}

/// Shared by `UpdateLog::append` and `DocumentStore::create` (which needs
/// the very first update written inside the same transaction that creates
/// the document row).
pub async fn append_in_tx(
	tx: &mut Transaction<'_, Postgres>,
	document_id: Uuid,
	actor: Option<&UserId>,
	data: &[u8],
) -> Result<i64> {
	let row = sqlx::query_as::<_, (i64,)>(
		"UPDATE document_state SET latest_update_seq = latest_update_seq + 1
		 WHERE document_id = $1
		 RETURNING latest_update_seq",
	)
	.bind(document_id)
	.fetch_optional(&mut **tx)
	.await?;
	let Some((seq,)) = row else {
		return Err(Error::NotFound);
	};

	sqlx::query(
		"INSERT INTO document_updates (document_id, seq, actor_user_id, update_bytes)
		 VALUES ($1, $2, $3, $4)",
	)
	.bind(document_id)
	.bind(seq)
	.bind(actor.map(|u| u.0.as_str()))
	.bind(data)
	.execute(&mut **tx)
	.await?;

	Ok(seq)
}

// vim: ts=4
