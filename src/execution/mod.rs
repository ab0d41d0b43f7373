//! Execution Queue & Sandbox Runner: a durable job queue with per-user
//! rate limiting in front of a bounded pool of workers that run untrusted
//! code in ephemeral containers.

mod queue;
mod sandbox;
mod worker;

pub use queue::{ExecutionQueue, Job, JobResult, JobStatus, QueueCounts};
pub use sandbox::{looks_exploitative, Language, SandboxRunner};
pub use worker::WorkerPool;

// vim: ts=4
