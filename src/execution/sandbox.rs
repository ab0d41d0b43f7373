//! Sandbox Runner: executes one job per ephemeral, network-isolated
//! container with enforced CPU, memory, filesystem and output limits.
//!
//! Code is never written to a path inside the container — it is streamed
//! in over the container's stdin, sidestepping permission conflicts with
//! the read-only root filesystem entirely.

use std::time::Instant;

use bollard::container::{
	AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
};
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;

use crate::execution::queue::{Job, JobResult, JobStatus};
use crate::prelude::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Language {
	Python,
	JavaScript,
	Java,
}

/// Marks the boundary in the compiled-language wrapper's stderr between
/// `javac` diagnostics and anything the program itself later writes —
/// `run_container` uses this to classify the job as `failed` with
/// `reason: "compile error"` instead of attributing a bad exit code to
/// the program's own runtime behavior.
const COMPILE_ERROR_MARKER: &str = "__sandbox_compile_error__";

impl Language {
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"python" | "python3" => Some(Language::Python),
			"javascript" | "node" => Some(Language::JavaScript),
			"java" => Some(Language::Java),
			_ => None,
		}
	}

	fn image(self) -> &'static str {
		match self {
			Language::Python => "python:3.12-slim",
			Language::JavaScript => "node:20-slim",
			Language::Java => "eclipse-temurin:21-jdk-jammy",
		}
	}

	/// Reads the program from stdin; no user-controlled value is ever
	/// interpolated into this command string. Compiled languages are the
	/// exception — `class_name` (already validated, see
	/// `extract_java_class_name`) is spliced into a small shell wrapper
	/// because `javac`/`java` both need the source file and the class it
	/// defines to share a name. `run` always resolves a class name before
	/// calling this for `Language::Java`; the `ok_or` below exists so a
	/// future caller that forgets to can't reach a panic, only a
	/// propagated `Error::Internal`.
	fn command(self, class_name: Option<&str>) -> Result<Vec<String>> {
		match self {
			Language::Python => Ok(vec!["python3".into(), "-".into()]),
			Language::JavaScript => Ok(vec!["node".into(), "--input-type=module".into(), "-".into()]),
			Language::Java => {
				let class = class_name
					.ok_or_else(|| Error::Internal("java dispatch missing a validated class name".into()))?;
				Ok(vec![
					"sh".into(),
					"-c".into(),
					format!(
						"cd /tmp && cat > {class}.java && javac {class}.java 2>compile.log; \
						 rc=$?; \
						 if [ $rc -ne 0 ]; then echo {COMPILE_ERROR_MARKER} >&2; cat compile.log >&2; exit $rc; fi; \
						 java {class}"
					),
				])
			}
		}
	}
}

/// Pulls the first `public class <Name>` (or `public final class <Name>`)
/// declaration out of Java source so the container wrapper can name the
/// file after it, the same rule `javac` itself enforces. Returns `None` if
/// no such declaration is found; the caller treats that as a validation
/// failure rather than guessing a file name.
fn extract_java_class_name(code: &[u8]) -> Option<String> {
	let text = std::str::from_utf8(code).ok()?;
	let mut rest = text;
	loop {
		let idx = rest.find("public")?;
		let mut tail = rest[idx + "public".len()..].trim_start();
		tail = tail.strip_prefix("final").map(|t| t.trim_start()).unwrap_or(tail);
		if let Some(after_class) = tail.strip_prefix("class") {
			let after_class = after_class.trim_start();
			let name: String = after_class.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
			if is_valid_identifier(&name) {
				return Some(name);
			}
		}
		rest = &rest[idx + "public".len()..];
	}
}

fn is_valid_identifier(s: &str) -> bool {
	!s.is_empty()
		&& s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
		&& s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const CPU_QUOTA_US: i64 = 100_000; // 1 core, 100ms quota per 100ms period
const MEMORY_LIMIT_BYTES: i64 = 256 * 1024 * 1024;
const TMPFS_SIZE_BYTES: usize = 10 * 1024 * 1024;

pub struct SandboxRunner {
	docker: Option<Docker>,
	output_max_bytes: usize,
}

impl SandboxRunner {
	/// Connects to the local container engine and verifies the images the
	/// supported languages need are present. Returns a runner with
	/// `available() == false` (never an error) if the engine can't be
	/// reached — callers surface `sandbox_unavailable` instead of
	/// degrading silently to an unsandboxed path.
	pub async fn connect(output_max_bytes: usize) -> Self {
		let docker = match Docker::connect_with_local_defaults() {
			Ok(docker) => docker,
			Err(e) => {
				warn!("cannot connect to container engine: {}", e);
				return SandboxRunner { docker: None, output_max_bytes };
			}
		};

		match docker.ping().await {
			Ok(_) => {}
			Err(e) => {
				warn!("container engine unreachable: {}", e);
				return SandboxRunner { docker: None, output_max_bytes };
			}
		}

		for lang in [Language::Python, Language::JavaScript, Language::Java] {
			if let Err(e) = docker.inspect_image(lang.image()).await {
				warn!("required sandbox image {} missing: {}", lang.image(), e);
				return SandboxRunner { docker: None, output_max_bytes };
			}
		}

		SandboxRunner { docker: Some(docker), output_max_bytes }
	}

	pub fn available(&self) -> bool {
		self.docker.is_some()
	}

	pub async fn run(&self, job: &Job) -> Result<JobResult> {
		let Some(docker) = &self.docker else {
			return Err(Error::SandboxUnavailable);
		};
		let Some(language) = Language::parse(&job.language) else {
			return Err(Error::Validation(format!("unsupported language: {}", job.language)));
		};
		let class_name = if language == Language::Java {
			let Some(name) = extract_java_class_name(&job.code) else {
				return Err(Error::Validation("could not find a public class declaration in Java source".into()));
			};
			Some(name)
		} else {
			None
		};

		let name = format!("exec-{}", job.id);
		let host_config = HostConfig {
			cpu_quota: Some(CPU_QUOTA_US),
			cpu_period: Some(100_000),
			memory: Some(MEMORY_LIMIT_BYTES),
			memory_swap: Some(MEMORY_LIMIT_BYTES),
			network_mode: Some("none".into()),
			readonly_rootfs: Some(true),
			tmpfs: Some(std::collections::HashMap::from([(
				"/tmp".to_string(),
				format!("size={TMPFS_SIZE_BYTES}"),
			)])),
			ulimits: Some(vec![ResourcesUlimits { name: Some("nofile".into()), soft: Some(64), hard: Some(64) }]),
			..Default::default()
		};

		let config = ContainerConfig {
			image: Some(language.image().to_string()),
			cmd: Some(language.command(class_name.as_deref())?),
			user: Some("nobody".into()),
			attach_stdin: Some(true),
			attach_stdout: Some(true),
			attach_stderr: Some(true),
			open_stdin: Some(true),
			stdin_once: Some(true),
			host_config: Some(host_config),
			..Default::default()
		};

		let create_opts = CreateContainerOptions { name: name.clone(), platform: None };
		docker.create_container(Some(create_opts), config).await?;

		let result = self.run_container(docker, &name, job).await;

		let _ = docker
			.remove_container(&name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
			.await;

		result
	}

	async fn run_container(&self, docker: &Docker, name: &str, job: &Job) -> Result<JobResult> {
		let attach_opts = AttachContainerOptions::<String> {
			stdin: Some(true),
			stdout: Some(true),
			stderr: Some(true),
			stream: Some(true),
			..Default::default()
		};
		let bollard::container::AttachContainerResults { mut output, mut input } =
			docker.attach_container(name, Some(attach_opts)).await?;

		docker.start_container::<String>(name, None).await?;

		use tokio::io::AsyncWriteExt;
		input.write_all(&job.code).await.map_err(|e| Error::Transient(format!("stdin write failed: {e}")))?;
		input.shutdown().await.ok();

		let started = Instant::now();
		let mut stdout = Vec::new();
		let mut stderr = Vec::new();
		let mut output_overflow = false;

		let collect = async {
			while let Some(chunk) = output.next().await {
				match chunk {
					Ok(bollard::container::LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
					Ok(bollard::container::LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
					Ok(_) => {}
					Err(_) => break,
				}
				if stdout.len() + stderr.len() > self.output_max_bytes {
					output_overflow = true;
					break;
				}
			}
		};

		let timed_out = tokio::time::timeout(job.timeout, collect).await.is_err();

		let exit_code = if timed_out || output_overflow {
			let _ = docker.kill_container::<String>(name, None).await;
			None
		} else {
			match docker.wait_container::<String>(name, None).next().await {
				Some(Ok(wait)) => Some(wait.status_code as i32),
				_ => None,
			}
		};

		let elapsed_ms = started.elapsed().as_millis() as u64;

		let stderr_text = String::from_utf8_lossy(&stderr);
		let compile_error = stderr_text.contains(COMPILE_ERROR_MARKER);

		let (status, reason) = if timed_out {
			(JobStatus::Timeout, Some("execution timed out".to_string()))
		} else if output_overflow {
			(JobStatus::Failed, Some("output_limit".to_string()))
		} else if compile_error {
			(JobStatus::Failed, Some("compile error".to_string()))
		} else {
			(JobStatus::Completed, None)
		};

		if compile_error {
			stderr = stderr_text.replace(COMPILE_ERROR_MARKER, "").trim_start().as_bytes().to_vec();
		}

		stdout.truncate(self.output_max_bytes);
		stderr.truncate(self.output_max_bytes);

		Ok(JobResult {
			status,
			stdout: String::from_utf8_lossy(&stdout).into_owned(),
			stderr: String::from_utf8_lossy(&stderr).into_owned(),
			exit_code,
			elapsed_ms,
			reason,
		})
	}
}

/// Coarse defense-in-depth filter rejecting obvious host-escape attempts.
/// Never the primary security boundary — the container is.
pub fn looks_exploitative(code: &[u8]) -> bool {
	let Ok(text) = std::str::from_utf8(code) else { return false };
	const DENY: &[&str] = &[
		"os.system",
		"subprocess",
		"/proc/self",
		"child_process",
		"require('net')",
		"require(\"net\")",
		"Runtime.getRuntime",
		"ProcessBuilder",
	];
	DENY.iter().any(|pat| text.contains(pat))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_public_class_name() {
		let src = b"import java.util.*;\n\npublic class HelloWorld {\n    public static void main(String[] a) {}\n}\n";
		assert_eq!(extract_java_class_name(src), Some("HelloWorld".to_string()));
	}

	#[test]
	fn extracts_public_final_class_name() {
		let src = b"public final class Solver { }";
		assert_eq!(extract_java_class_name(src), Some("Solver".to_string()));
	}

	#[test]
	fn rejects_source_with_no_public_class() {
		let src = b"class Helper { }";
		assert_eq!(extract_java_class_name(src), None);
	}

	#[test]
	fn identifier_validation_rejects_non_alnum_and_leading_digit() {
		assert!(is_valid_identifier("Valid_Name1"));
		assert!(!is_valid_identifier(""));
		assert!(!is_valid_identifier("1Bad"));
		assert!(!is_valid_identifier("bad;rm -rf"));
	}
}

// vim: ts=4
