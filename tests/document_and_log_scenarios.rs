//! Scenario tests against a real (ephemeral, per-test) Postgres database,
//! provisioned by `sqlx::test` from `migrations/0001_init.sql`. These cover
//! the concrete scenarios and invariants around the Document Store and
//! Update Log that don't need a running gateway or sandbox to exercise.

use collabhub::documents::{DocumentStore, ShareMode};
use collabhub::types::UserId;
use collabhub::update_log::UpdateLog;
use sqlx::PgPool;

fn user(name: &str) -> UserId {
	UserId(name.to_string())
}

/// Scenario 1 (two-peer edit), the Update Log half: two concurrent
/// appenders to the same document must receive distinct sequence numbers
/// and `document_state.latest_update_seq` must land on the count of
/// updates, regardless of which append wins the race.
#[sqlx::test]
async fn concurrent_appends_yield_distinct_contiguous_sequences(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let log = UpdateLog::new(pool.clone());
	let owner = user("alice");
	let doc = documents.create(&owner, "two peer doc", None).await.unwrap();

	let a = log.append(doc.id, Some(&owner), b"u1");
	let b = log.append(doc.id, Some(&user("bob")), b"u2");
	let (seq_a, seq_b) = tokio::join!(a, b);
	let seq_a = seq_a.unwrap();
	let seq_b = seq_b.unwrap();

	assert_ne!(seq_a, seq_b, "concurrent appenders must not receive the same sequence");
	let mut seqs = vec![seq_a, seq_b];
	seqs.sort();
	assert_eq!(seqs, vec![1, 2]);

	let state = log.state(doc.id).await.unwrap();
	assert_eq!(state.latest_update_seq, 2);

	let tail = log.tail(doc.id, 0).await.unwrap();
	assert_eq!(tail.len(), 2);
	assert!(tail.windows(2).all(|w| w[0].seq < w[1].seq), "tail must be ascending");
}

/// Scenario 2 (snapshot and prune): after marking a snapshot with pruning
/// enabled, entries at or below that sequence are gone and the pointer
/// reflects the new snapshot.
#[sqlx::test]
async fn snapshot_mark_with_prune_deletes_covered_entries(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let log = UpdateLog::new(pool.clone());
	let owner = user("alice");
	let doc = documents.create(&owner, "snapshot doc", None).await.unwrap();

	for i in 0..3 {
		log.append(doc.id, Some(&owner), format!("u{i}").as_bytes()).await.unwrap();
	}

	log.snapshot_mark(doc.id, 3, "docs/x/snapshots/3.bin", true).await.unwrap();

	let state = log.state(doc.id).await.unwrap();
	assert_eq!(state.latest_snapshot_seq, 3);
	assert_eq!(state.latest_snapshot_key.as_deref(), Some("docs/x/snapshots/3.bin"));

	let tail = log.tail(doc.id, 0).await.unwrap();
	assert!(tail.is_empty(), "entries at or below the snapshot sequence must be pruned");
}

/// A later snapshot_mark never regresses the pointer: a stale caller racing
/// behind a newer snapshot is a silent no-op, not a corruption.
#[sqlx::test]
async fn snapshot_mark_does_not_regress_the_pointer(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let log = UpdateLog::new(pool.clone());
	let owner = user("alice");
	let doc = documents.create(&owner, "race doc", None).await.unwrap();
	for i in 0..5 {
		log.append(doc.id, Some(&owner), format!("u{i}").as_bytes()).await.unwrap();
	}

	log.snapshot_mark(doc.id, 5, "docs/x/snapshots/5.bin", false).await.unwrap();
	log.snapshot_mark(doc.id, 2, "docs/x/snapshots/2.bin", false).await.unwrap();

	let state = log.state(doc.id).await.unwrap();
	assert_eq!(state.latest_snapshot_seq, 5);
	assert_eq!(state.latest_snapshot_key.as_deref(), Some("docs/x/snapshots/5.bin"));
}

/// Creating a document with `initialContent` writes it as sequence 1 in
/// the same transaction as the document row itself.
#[sqlx::test]
async fn create_with_initial_content_writes_sequence_one(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let log = UpdateLog::new(pool.clone());
	let owner = user("alice");
	let doc = documents.create(&owner, "seeded doc", Some(b"hello")).await.unwrap();

	let tail = log.tail(doc.id, 0).await.unwrap();
	assert_eq!(tail.len(), 1);
	assert_eq!(tail[0].seq, 1);
	assert_eq!(tail[0].data, b"hello");

	let state = log.state(doc.id).await.unwrap();
	assert_eq!(state.latest_update_seq, 1);
}

/// Scenario 6 (share link rotation): a second rotation invalidates the
/// first token outright, and only the newly issued role is honored.
#[sqlx::test]
async fn second_rotation_invalidates_the_first_token(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let owner = user("alice");
	let doc = documents.create(&owner, "shared doc", None).await.unwrap();

	let first = documents.rotate_share_link(&owner, doc.id, ShareMode::View).await.unwrap();
	let second = documents.rotate_share_link(&owner, doc.id, ShareMode::Edit).await.unwrap();
	assert_ne!(first, second);

	assert_eq!(documents.resolve_share_link(doc.id, &first).await.unwrap(), None);
	assert_eq!(documents.resolve_share_link(doc.id, &second).await.unwrap(), Some(collabhub::types::Role::Editor));
}

/// Only the owner may rotate a share link; an editor or an unrelated user
/// gets `Forbidden`.
#[sqlx::test]
async fn non_owner_cannot_rotate_share_link(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let owner = user("alice");
	let stranger = user("mallory");
	let doc = documents.create(&owner, "private doc", None).await.unwrap();

	let result = documents.rotate_share_link(&stranger, doc.id, ShareMode::View).await;
	assert!(matches!(result, Err(collabhub::error::Error::Forbidden)));
}

/// The authorization rule in the Document Store contract: a caller who is
/// neither a member nor holding a valid share token resolves to no role at
/// all, which is what gateway join-handling treats as unauthorized.
#[sqlx::test]
async fn stranger_without_share_token_has_no_effective_role(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let owner = user("alice");
	let stranger = user("mallory");
	let doc = documents.create(&owner, "private doc", None).await.unwrap();

	let role = documents.effective_role(Some(&stranger), doc.id, None).await.unwrap();
	assert_eq!(role, None);

	let token = documents.rotate_share_link(&owner, doc.id, ShareMode::View).await.unwrap();
	let role = documents.effective_role(Some(&stranger), doc.id, Some(&token)).await.unwrap();
	assert_eq!(role, Some(collabhub::types::Role::Viewer));
}

/// `list_for` excludes archived documents and documents the caller has no
/// membership in, newest-first.
#[sqlx::test]
async fn list_for_excludes_non_members_and_orders_newest_first(pool: PgPool) {
	let documents = DocumentStore::new(pool.clone());
	let alice = user("alice");
	let bob = user("bob");

	let _d1 = documents.create(&alice, "first", None).await.unwrap();
	let d2 = documents.create(&alice, "second", None).await.unwrap();
	let _other = documents.create(&bob, "bob's doc", None).await.unwrap();

	let listed = documents.list_for(&alice).await.unwrap();
	assert_eq!(listed.len(), 2);
	assert_eq!(listed[0].id, d2.id, "most recently updated document first");
	assert!(listed.iter().all(|d| d.owner_user_id == alice.0));
}
