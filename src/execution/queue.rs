//! Durable, cross-process job queue. Jobs and their results live in
//! Postgres rather than in memory, so a job's identity and final status
//! survive a worker crash — the HTTP caller polling a job id after a
//! restart still gets a deterministic answer instead of silence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::prelude::*;
use crate::types::UserId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Running,
	Completed,
	Failed,
	Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
	pub status: JobStatus,
	pub stdout: String,
	pub stderr: String,
	pub exit_code: Option<i32>,
	pub elapsed_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// Queue depth snapshot surfaced through `/health`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueCounts {
	pub queued: u64,
	pub running: u64,
}

#[derive(Debug, Clone)]
pub struct Job {
	pub id: Uuid,
	pub owner: UserId,
	pub document_id: Option<Uuid>,
	pub language: String,
	pub code: Vec<u8>,
	pub timeout: Duration,
	pub enqueued_at: DateTime<Utc>,
}

/// Results are kept for this long after completion so a caller polling
/// the job id can still retrieve them.
const RESULT_RETENTION: Duration = Duration::from_secs(120);

pub struct ExecutionQueue {
	db: PgPool,
}

impl ExecutionQueue {
	pub fn new(db: PgPool) -> Self {
		ExecutionQueue { db }
	}

	pub async fn enqueue(
		&self,
		owner: &UserId,
		document_id: Option<Uuid>,
		language: &str,
		code: Vec<u8>,
		timeout: Duration,
	) -> Result<Job> {
		let id = Uuid::new_v4();
		sqlx::query(
			"INSERT INTO execution_jobs (id, owner_user_id, document_id, language, code, timeout_ms, status)
			 VALUES ($1, $2, $3, $4, $5, $6, 'queued')",
		)
		.bind(id)
		.bind(&owner.0)
		.bind(document_id)
		.bind(language)
		.bind(&code)
		.bind(timeout.as_millis() as i64)
		.execute(&self.db)
		.await?;

		Ok(Job { id, owner: owner.clone(), document_id, language: language.to_string(), code, timeout, enqueued_at: Utc::now() })
	}

	/// Claims the oldest queued job, marking it `running`. Returns `None`
	/// if there is nothing to do — callers poll this in a loop rather than
	/// the queue pushing work, keeping the "at most N workers" bound
	/// trivial to enforce.
	pub async fn claim_next(&self) -> Result<Option<Job>> {
		let row = sqlx::query_as::<_, (Uuid, String, Option<Uuid>, String, Vec<u8>, i64, DateTime<Utc>)>(
			"UPDATE execution_jobs SET status = 'running'
			 WHERE id = (
			   SELECT id FROM execution_jobs WHERE status = 'queued'
			   ORDER BY enqueued_at ASC
			   FOR UPDATE SKIP LOCKED LIMIT 1
			 )
			 RETURNING id, owner_user_id, document_id, language, code, timeout_ms, enqueued_at",
		)
		.fetch_optional(&self.db)
		.await?;

		Ok(row.map(|(id, owner, document_id, language, code, timeout_ms, enqueued_at)| Job {
			id,
			owner: UserId(owner),
			document_id,
			language,
			code,
			timeout: Duration::from_millis(timeout_ms as u64),
			enqueued_at,
		}))
	}

	pub async fn complete(&self, job_id: Uuid, result: &JobResult) -> Result<()> {
		sqlx::query(
			"UPDATE execution_jobs SET status = $2, stdout = $3, stderr = $4, exit_code = $5,
			   elapsed_ms = $6, reason = $7, completed_at = now()
			 WHERE id = $1",
		)
		.bind(job_id)
		.bind(result.status)
		.bind(&result.stdout)
		.bind(&result.stderr)
		.bind(result.exit_code)
		.bind(result.elapsed_ms as i64)
		.bind(&result.reason)
		.execute(&self.db)
		.await?;
		Ok(())
	}

	pub async fn result(&self, job_id: Uuid) -> Result<Option<(JobStatus, Option<JobResult>)>> {
		let row = sqlx::query_as::<_, (JobStatus, Option<String>, Option<String>, Option<i32>, Option<i64>, Option<String>)>(
			"SELECT status, stdout, stderr, exit_code, elapsed_ms, reason FROM execution_jobs WHERE id = $1",
		)
		.bind(job_id)
		.fetch_optional(&self.db)
		.await?;

		Ok(row.map(|(status, stdout, stderr, exit_code, elapsed_ms, reason)| {
			let result = match status {
				JobStatus::Queued | JobStatus::Running => None,
				_ => Some(JobResult {
					status,
					stdout: stdout.unwrap_or_default(),
					stderr: stderr.unwrap_or_default(),
					exit_code,
					elapsed_ms: elapsed_ms.unwrap_or_default() as u64,
					reason,
				}),
			};
			(status, result)
		}))
	}

	/// Counts of jobs currently sitting in each pre-terminal state, for
	/// `/health`'s queue counters.
	pub async fn counts(&self) -> Result<QueueCounts> {
		let row = sqlx::query_as::<_, (i64, i64)>(
			"SELECT
			   count(*) FILTER (WHERE status = 'queued'),
			   count(*) FILTER (WHERE status = 'running')
			 FROM execution_jobs",
		)
		.fetch_one(&self.db)
		.await?;
		Ok(QueueCounts { queued: row.0 as u64, running: row.1 as u64 })
	}

	/// Deletes completed jobs older than the retention window. Intended to
	/// be called periodically from a background task.
	pub async fn gc(&self) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::from_std(RESULT_RETENTION).unwrap_or_default();
		let res = sqlx::query(
			"DELETE FROM execution_jobs WHERE completed_at IS NOT NULL AND completed_at < $1",
		)
		.bind(cutoff)
		.execute(&self.db)
		.await?;
		Ok(res.rows_affected())
	}
}

// vim: ts=4
