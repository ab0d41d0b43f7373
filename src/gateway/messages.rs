//! Wire messages for the realtime gateway. JSON over a WebSocket text
//! frame, with binary payloads (CRDT update bytes, presence blobs)
//! base64-encoded inline — this keeps one message format for both
//! directions instead of splitting control messages (JSON) from data
//! messages (binary frames) the way the CRDT prototype this module
//! replaces did.

use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{JobResult, JobStatus};

fn b64_encode(bytes: &[u8]) -> String {
	base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
	base64::engine::general_purpose::STANDARD.decode(s)
}

mod b64_bytes {
	use super::*;
	use serde::{Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&b64_encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		b64_decode(&s).map_err(serde::de::Error::custom)
	}
}

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
	Join { document: Uuid, share_token: Option<String> },
	Leave { document: Uuid },
	Update { document: Uuid, #[serde(with = "b64_bytes")] bytes: Vec<u8> },
	Presence { document: Uuid, #[serde(with = "b64_bytes")] bytes: Vec<u8> },
}

/// Messages the server may send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
	Init {
		document: Uuid,
		#[serde(skip_serializing_if = "Option::is_none", with = "opt_b64_bytes")]
		snapshot: Option<Vec<u8>>,
		after_seq: i64,
		updates: Vec<UpdateEnvelope>,
	},
	Update {
		document: Uuid,
		seq: i64,
		#[serde(with = "b64_bytes")]
		bytes: Vec<u8>,
	},
	Presence {
		document: Uuid,
		peer: Uuid,
		#[serde(with = "b64_bytes")]
		bytes: Vec<u8>,
	},
	PresenceRequest {
		document: Uuid,
	},
	PeerJoined {
		document: Uuid,
		peer: Uuid,
		name: Option<String>,
	},
	PeerLeft {
		document: Uuid,
		peer: Uuid,
	},
	ActivePeers {
		document: Uuid,
		peers: Vec<Uuid>,
	},
	ExecuteResult {
		document: Option<Uuid>,
		execution_id: Uuid,
		status: JobStatus,
		output: String,
		error: Option<String>,
		execution_time_ms: u64,
	},
	Error {
		reason: String,
	},
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateEnvelope {
	pub seq: i64,
	#[serde(with = "b64_bytes")]
	pub bytes: Vec<u8>,
}

mod opt_b64_bytes {
	use super::*;
	use serde::Serializer;

	pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
		match bytes {
			Some(b) => serializer.serialize_str(&b64_encode(b)),
			None => serializer.serialize_none(),
		}
	}
}

impl ServerMessage {
	pub fn execute_result(document: Option<Uuid>, execution_id: Uuid, result: &JobResult) -> Self {
		ServerMessage::ExecuteResult {
			document,
			execution_id,
			status: result.status,
			output: format!("{}{}", result.stdout, result.stderr),
			error: result.reason.clone(),
			execution_time_ms: result.elapsed_ms,
		}
	}

	pub fn error(reason: impl Into<String>) -> Self {
		ServerMessage::Error { reason: reason.into() }
	}
}

// vim: ts=4
