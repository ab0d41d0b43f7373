//! Bounded worker pool consuming the execution queue.
//!
//! The teacher's worker pool (`server/src/worker.rs`) spins OS threads that
//! block on a flume receiver for CPU-bound closures. Sandbox dispatch here
//! is I/O-bound (container create/attach/wait over a unix socket), so the
//! pool instead spawns a bounded number of tokio tasks that each poll the
//! queue directly. `shutdown_lock` serializes "should I spawn a new worker"
//! against "should I exit, I've been idle" so the two decisions can't race
//! and strand a job with nobody left to claim it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::execution::queue::ExecutionQueue;
use crate::execution::sandbox::SandboxRunner;
use crate::prelude::*;

struct Shared {
	queue: Arc<ExecutionQueue>,
	sandbox: Arc<SandboxRunner>,
	max_concurrency: usize,
	idle_timeout: Duration,
	active: AtomicUsize,
	shutdown_lock: Mutex<()>,
}

/// Lazily starts workers on demand (up to `max_concurrency`) and tears
/// each one down after it sits idle for `idle_timeout`. There is no
/// persistent thread pool to keep alive when the system has nothing to
/// execute.
#[derive(Clone)]
pub struct WorkerPool {
	shared: Arc<Shared>,
}

impl WorkerPool {
	pub fn new(queue: Arc<ExecutionQueue>, sandbox: Arc<SandboxRunner>, max_concurrency: usize, idle_timeout: Duration) -> Self {
		WorkerPool {
			shared: Arc::new(Shared {
				queue,
				sandbox,
				max_concurrency: max_concurrency.max(1),
				idle_timeout,
				active: AtomicUsize::new(0),
				shutdown_lock: Mutex::new(()),
			}),
		}
	}

	/// Called after a job is enqueued. Starts a new worker task if capacity
	/// allows and none are already running to pick it up; otherwise a
	/// currently-running worker (or one about to start) will get to it.
	pub async fn notify(&self) {
		let _guard = self.shared.shutdown_lock.lock().await;
		let current = self.shared.active.load(Ordering::SeqCst);
		if current >= self.shared.max_concurrency {
			return;
		}
		self.shared.active.fetch_add(1, Ordering::SeqCst);
		let shared = self.shared.clone();
		tokio::spawn(async move { run_worker(shared).await });
	}

	pub fn active_count(&self) -> usize {
		self.shared.active.load(Ordering::SeqCst)
	}
}

async fn run_worker(shared: Arc<Shared>) {
	let mut last_job_at = Instant::now();
	loop {
		match shared.queue.claim_next().await {
			Ok(Some(job)) => {
				last_job_at = Instant::now();
				let job_id = job.id;
				let result = shared.sandbox.run(&job).await;
				let outcome = match result {
					Ok(result) => result,
					Err(e) => {
						warn!("execution job {} failed: {}", job_id, e);
						crate::execution::queue::JobResult {
							status: crate::execution::queue::JobStatus::Failed,
							stdout: String::new(),
							stderr: String::new(),
							exit_code: None,
							elapsed_ms: 0,
							reason: Some(e.to_string()),
						}
					}
				};
				if let Err(e) = shared.queue.complete(job_id, &outcome).await {
					warn!("failed to record result for execution job {}: {}", job_id, e);
				}
			}
			Ok(None) => {
				if last_job_at.elapsed() >= shared.idle_timeout {
					let guard = shared.shutdown_lock.lock().await;
					// Re-check after acquiring the lock: a job may have been
					// enqueued (and `notify` may have decided not to spawn a
					// sibling, seeing this worker as still active) between
					// the idle check above and taking the lock here.
					match shared.queue.claim_next().await {
						Ok(Some(job)) => {
							drop(guard);
							last_job_at = Instant::now();
							let job_id = job.id;
							let outcome = shared.sandbox.run(&job).await.unwrap_or_else(|e| {
								warn!("execution job {} failed: {}", job_id, e);
								crate::execution::queue::JobResult {
									status: crate::execution::queue::JobStatus::Failed,
									stdout: String::new(),
									stderr: String::new(),
									exit_code: None,
									elapsed_ms: 0,
									reason: Some(e.to_string()),
								}
							});
							if let Err(e) = shared.queue.complete(job_id, &outcome).await {
								warn!("failed to record result for execution job {}: {}", job_id, e);
							}
							continue;
						}
						Ok(None) => {
							shared.active.fetch_sub(1, Ordering::SeqCst);
							return;
						}
						Err(e) => {
							warn!("claim_next failed while checking idle shutdown: {}", e);
							shared.active.fetch_sub(1, Ordering::SeqCst);
							return;
						}
					}
				}
				tokio::time::sleep(Duration::from_millis(100)).await;
			}
			Err(e) => {
				warn!("claim_next failed: {}", e);
				tokio::time::sleep(Duration::from_millis(500)).await;
			}
		}
	}
}

// vim: ts=4
