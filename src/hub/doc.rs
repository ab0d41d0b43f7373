//! Pure, blocking CRDT operations. Kept separate from the async Hub state
//! so every yrs call can be dispatched through `spawn_blocking` — `yrs::Doc`
//! is not `Send` across await points, and applying/encoding updates is CPU
//! work that shouldn't run on the async executor's thread anyway.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, StateVector, Text, Transact, Update};

use crate::prelude::*;

/// Name of the root text type every document is seeded with. Clients
/// agree on this name out of band; the server only needs it to seed
/// `initialContent` at document creation time.
const ROOT_TEXT_NAME: &str = "content";

/// Encodes `text` as the first CRDT update for a brand-new document, the
/// way `POST /api/documents` with `initialContent` needs it.
pub fn initial_update(text: &[u8]) -> Result<Vec<u8>> {
	let text = std::str::from_utf8(text).map_err(|e| Error::Validation(format!("initialContent must be UTF-8: {e}")))?;
	let doc = yrs::Doc::new();
	let root = doc.get_or_insert_text(ROOT_TEXT_NAME);
	{
		let mut txn = doc.transact_mut();
		root.insert(&mut txn, 0, text);
	}
	let txn = doc.transact();
	Ok(txn.encode_state_as_update_v1(&StateVector::default()))
}

/// Folds `update` into `merged` (the encoded state of everything applied
/// so far) and returns the new merged encoding. `merged = None` means
/// "start from an empty document".
pub fn merge(merged: Option<&[u8]>, update: &[u8]) -> Result<Vec<u8>> {
	let doc = yrs::Doc::new();
	{
		let mut txn = doc.transact_mut();
		if let Some(bytes) = merged {
			let decoded = Update::decode_v1(bytes)
				.map_err(|e| Error::InconsistentState(format!("corrupt cached state: {e}")))?;
			txn.apply_update(decoded).map_err(|e| Error::InconsistentState(format!("apply failed: {e}")))?;
		}
		let decoded =
			Update::decode_v1(update).map_err(|e| Error::Validation(format!("malformed CRDT update: {e}")))?;
		txn.apply_update(decoded).map_err(|e| Error::Validation(format!("update rejected: {e}")))?;
	}
	let txn = doc.transact();
	Ok(txn.encode_state_as_update_v1(&StateVector::default()))
}

/// Folds a full tail of updates onto an optional snapshot, producing the
/// merged state used to seed a Hub's cache on load.
pub fn replay(snapshot: Option<&[u8]>, tail: &[Vec<u8>]) -> Result<Vec<u8>> {
	let mut merged = snapshot.map(<[u8]>::to_vec);
	for update in tail {
		merged = Some(merge(merged.as_deref(), update)?);
	}
	merged.ok_or(()).or_else(|()| {
		// No snapshot and no tail: an empty but valid encoded state.
		let doc = yrs::Doc::new();
		let txn = doc.transact();
		Ok(txn.encode_state_as_update_v1(&StateVector::default()))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use yrs::GetString;

	fn text_of(encoded: &[u8]) -> String {
		let doc = yrs::Doc::new();
		let root = doc.get_or_insert_text(ROOT_TEXT_NAME);
		{
			let mut txn = doc.transact_mut();
			let update = Update::decode_v1(encoded).unwrap();
			txn.apply_update(update).unwrap();
		}
		let txn = doc.transact();
		root.get_string(&txn)
	}

	#[test]
	fn initial_update_roundtrips_through_merge() {
		let seed = initial_update(b"hello world").unwrap();
		let merged = merge(None, &seed).unwrap();
		assert_eq!(text_of(&merged), "hello world");
	}

	#[test]
	fn replay_with_no_snapshot_and_no_tail_yields_empty_document() {
		let merged = replay(None, &[]).unwrap();
		assert_eq!(text_of(&merged), "");
	}

	#[test]
	fn replay_applies_snapshot_then_tail_in_order() {
		let snapshot = initial_update(b"abc").unwrap();
		let doc = yrs::Doc::new();
		let root = doc.get_or_insert_text(ROOT_TEXT_NAME);
		let delta = {
			let mut txn = doc.transact_mut();
			let update = Update::decode_v1(&snapshot).unwrap();
			txn.apply_update(update).unwrap();
			root.insert(&mut txn, 3, "def");
			txn.encode_update_v1()
		};
		let merged = replay(Some(&snapshot), &[delta]).unwrap();
		assert_eq!(text_of(&merged), "abcdef");
	}

	#[test]
	fn concurrent_updates_converge_regardless_of_merge_order() {
		let u1 = initial_update(b"A").unwrap();
		let u2 = initial_update(b"B").unwrap();

		let ab = merge(Some(&merge(None, &u1).unwrap()), &u2).unwrap();
		let ba = merge(Some(&merge(None, &u2).unwrap()), &u1).unwrap();

		assert_eq!(text_of(&ab), text_of(&ba));
	}
}

// vim: ts=4
