//! QA tests for progress persistence and cold-start recovery.
//!
//! These tests verify that progress survives restarts, and pin down exactly
//! what a restart sees after each kind of storage failure.
//! Run with: `cargo test -p waymark-core --test qa_persistence`

use catalog::StaticSource;
use std::sync::Arc;
use tempfile::TempDir;
use waymark_core::persist::{CLAIMED_COUNT_KEY, CLAIMED_TEXT_KEY, CURSOR_KEY};
use waymark_core::testing::{assert_progress, sample_trail, FlakyStore, TestHarness};
use waymark_core::{
    ClaimSession, Durability, FileKeyValueStore, KeyValueStore, ProgressStore, SessionConfig,
    WritePolicy,
};

// =============================================================================
// TEST 1: Progress survives a restart
// =============================================================================

#[tokio::test]
async fn test_restart_resumes_progress() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    harness.session.claim().await.unwrap();
    harness.session.claim().await.unwrap();

    let reopened = harness.restart().await.expect("Restart should succeed");
    assert_progress(&reopened, 2, &harness.texts(2));
    assert_eq!(reopened.current_marker().unwrap().index, 2);
    assert_eq!(reopened.durability(), Durability::Synced);
}

// =============================================================================
// TEST 2: A failed save under the optimistic policy
// =============================================================================

#[tokio::test]
async fn test_failed_save_diverges_until_restart() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    let session = &harness.session;

    session.claim().await.expect("First claim persists");

    harness.store.fail_next_sets(1);
    let err = session.claim().await.expect_err("Second save should fail");
    assert!(err.is_durability_failure());

    // Memory moved ahead of the store.
    assert_progress(session, 2, &harness.texts(2));
    assert_eq!(session.durability(), Durability::Degraded);

    // A restart before any further save loses the optimistic claim.
    let reopened = harness.restart().await.expect("Restart should succeed");
    assert_progress(&reopened, 1, &harness.texts(1));
}

#[tokio::test]
async fn test_next_successful_save_catches_up() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    let session = &harness.session;

    session.claim().await.unwrap();
    harness.store.fail_next_sets(1);
    assert!(session.claim().await.is_err());
    session.claim().await.expect("Third claim persists");
    assert_eq!(session.durability(), Durability::Synced);

    let reopened = harness.restart().await.unwrap();
    assert_progress(&reopened, 3, &harness.texts(3));
}

// =============================================================================
// TEST 3: A failed save under the pessimistic policy
// =============================================================================

#[tokio::test]
async fn test_pessimistic_memory_matches_store() {
    let config = SessionConfig::new().with_write_policy(WritePolicy::Pessimistic);
    let harness = TestHarness::with_config(sample_trail(3), config)
        .await
        .expect("Failed to start trail");
    let session = &harness.session;

    session.claim().await.unwrap();
    harness.store.fail_next_sets(1);
    assert!(session.claim().await.is_err());
    assert_progress(session, 1, &harness.texts(1));

    let reopened = harness.restart().await.unwrap();
    assert_eq!(reopened.snapshot().claimed_text, session.snapshot().claimed_text);
}

// =============================================================================
// TEST 4: Partial writes are reconciled on cold start
// =============================================================================

#[tokio::test]
async fn test_partial_claim_write_rolls_back_on_restart() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    harness.session.claim().await.unwrap();

    // Text and count land, the cursor does not.
    harness.store.fail_sets_on(CURSOR_KEY);
    assert!(harness.session.claim().await.is_err());
    harness.store.clear_faults();

    let stored = ProgressStore::new(harness.store.clone()).load().await.unwrap();
    assert_eq!(stored.cursor, 1);
    assert_eq!(stored.claimed_text.len(), 2);

    let reopened = harness.restart().await.unwrap();
    assert_progress(&reopened, 1, &harness.texts(1));
}

#[tokio::test]
async fn test_partial_undo_write_refills_on_restart() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    harness.session.claim().await.unwrap();
    harness.session.claim().await.unwrap();

    harness.store.fail_sets_on(CURSOR_KEY);
    assert!(harness.session.undo().await.is_err());
    harness.store.clear_faults();

    let reopened = harness.restart().await.unwrap();
    assert_progress(&reopened, 2, &harness.texts(2));
}

// =============================================================================
// TEST 5: Reset when the store cannot be cleared
// =============================================================================

#[tokio::test]
async fn test_reset_with_failed_clear() {
    let harness = TestHarness::start(3).await.expect("Failed to start trail");
    harness.session.claim().await.unwrap();
    harness.session.claim().await.unwrap();

    harness.store.fail_removes(true);
    let err = harness.session.reset().await.expect_err("Clear should fail");
    assert!(err.is_durability_failure());
    assert_progress(&harness.session, 0, &[]);

    // The store still holds the old walk.
    harness.store.clear_faults();
    let reopened = harness.restart().await.unwrap();
    assert_progress(&reopened, 2, &harness.texts(2));

    // Claiming again from the reset session overwrites it.
    harness.session.claim().await.unwrap();
    let reopened = harness.restart().await.unwrap();
    assert_progress(&reopened, 1, &harness.texts(1));
}

// =============================================================================
// TEST 6: Stored data that does not fit the catalog
// =============================================================================

#[tokio::test]
async fn test_cursor_clamped_to_shorter_catalog() {
    let store = Arc::new(FlakyStore::new());
    let texts: Vec<String> = sample_trail(4)
        .iter()
        .filter_map(|m| m.narrative_text())
        .collect();
    ProgressStore::new(store.clone())
        .save(4, 4, &texts)
        .await
        .unwrap();

    let session = ClaimSession::new(
        SessionConfig::new(),
        StaticSource::new(sample_trail(2)),
        store.clone(),
    );
    session.initialize().await.unwrap();

    assert_progress(&session, 2, &texts[..2]);
    assert!(session.is_complete());
}

#[tokio::test]
async fn test_missing_cursor_starts_from_zero() {
    let store = Arc::new(FlakyStore::new());
    store
        .set(CLAIMED_TEXT_KEY, r#"["Narrative for marker 0"]"#)
        .await
        .unwrap();
    store.set(CLAIMED_COUNT_KEY, "1").await.unwrap();

    let session = ClaimSession::new(
        SessionConfig::new(),
        StaticSource::new(sample_trail(2)),
        store.clone(),
    );
    session.initialize().await.unwrap();

    assert_progress(&session, 0, &[]);
}

// =============================================================================
// TEST 7: File-backed progress across process lifetimes
// =============================================================================

#[tokio::test]
async fn test_file_store_cold_start() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store_dir = temp_dir.path().join("progress");

    let texts: Vec<String> = sample_trail(3)
        .iter()
        .filter_map(|m| m.narrative_text())
        .collect();

    {
        let session = ClaimSession::new(
            SessionConfig::new(),
            StaticSource::new(sample_trail(3)),
            FileKeyValueStore::new(&store_dir),
        );
        session.initialize().await.unwrap();
        session.claim().await.unwrap();
        session.claim().await.unwrap();
        session.undo().await.unwrap();
    }

    let session = ClaimSession::new(
        SessionConfig::new(),
        StaticSource::new(sample_trail(3)),
        FileKeyValueStore::new(&store_dir),
    );
    session.initialize().await.unwrap();
    assert_progress(&session, 1, &texts[..1]);

    session.reset().await.unwrap();
    assert!(!store_dir.join("progress.json").exists());
    assert!(!store_dir.join("claimedText.json").exists());
}
