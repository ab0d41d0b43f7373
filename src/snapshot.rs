//! Snapshot Store: compacted CRDT state blobs in object storage.
//!
//! Snapshots are best-effort. If blob storage is unconfigured or
//! unreachable, the system is still correct via full Update Log replay —
//! callers must treat a snapshot-store failure as "fall back to replay",
//! never as a reason to refuse service.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use uuid::Uuid;

use crate::config::BlobConfig;
use crate::prelude::*;

pub struct SnapshotStore {
	store: Option<Arc<dyn ObjectStore>>,
}

fn key(document_id: Uuid, seq: i64) -> ObjectPath {
	ObjectPath::from(format!("docs/{document_id}/snapshots/{seq}.bin"))
}

impl SnapshotStore {
	pub fn configured(config: &BlobConfig) -> Result<Self> {
		let store = AmazonS3Builder::new()
			.with_endpoint(&config.endpoint)
			.with_region(&config.region)
			.with_bucket_name(&config.bucket)
			.with_access_key_id(&config.access_key_id)
			.with_secret_access_key(&config.secret_access_key)
			.with_allow_http(true)
			.build()
			.map_err(|e| Error::Internal(format!("invalid blob store configuration: {e}")))?;
		Ok(SnapshotStore { store: Some(Arc::new(store)) })
	}

	pub fn disabled() -> Self {
		SnapshotStore { store: None }
	}

	/// Plugs in an arbitrary `ObjectStore` implementation, bypassing the
	/// S3-specific builder. Used by tests to exercise the snapshot path
	/// against `object_store::memory::InMemory` instead of a real bucket.
	#[cfg(test)]
	pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
		SnapshotStore { store: Some(store) }
	}

	pub fn enabled(&self) -> bool {
		self.store.is_some()
	}

	/// Returns the storage key on success. Callers should treat any error
	/// here as non-fatal to the edit path — log and retry on the next
	/// snapshot trigger.
	pub async fn put(&self, document_id: Uuid, seq: i64, bytes: Vec<u8>) -> Result<String> {
		let Some(store) = &self.store else {
			return Err(Error::Transient("blob storage not configured".into()));
		};
		let path = key(document_id, seq);
		store.put(&path, bytes.into()).await?;
		Ok(path.to_string())
	}

	pub async fn get(&self, object_key: &str) -> Result<Vec<u8>> {
		let Some(store) = &self.store else {
			return Err(Error::NotFound);
		};
		let path = ObjectPath::from(object_key);
		let result = store.get(&path).await.map_err(|e| match e {
			object_store::Error::NotFound { .. } => Error::NotFound,
			other => Error::from(other),
		})?;
		let bytes = result.bytes().await?;
		Ok(bytes.to_vec())
	}
}

// vim: ts=4
