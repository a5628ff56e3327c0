//! Testing utilities for trail sessions.
//!
//! This module provides tools for integration testing:
//! - `FlakyStore` for injecting storage failures and parking writes
//! - `FailingSource` for an unreachable catalog
//! - `TestHarness` for scripted claim scenarios with restarts
//! - Assertion helpers for verifying progress

use crate::persist::{KeyValueStore, MemoryKeyValueStore, PersistError};
use crate::session::{ClaimError, ClaimSession, ProgressView, SessionConfig};
use async_trait::async_trait;
use catalog::{Coordinates, MarkerSource, RawMarker, StaticSource};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A trail of `n` markers a hundred metres or so apart.
pub fn sample_trail(n: usize) -> Vec<RawMarker> {
    (0..n)
        .map(|i| {
            RawMarker::new(
                format!("Narrative for marker {i}"),
                Coordinates::new(51.9225 + i as f64 * 0.001, 4.4792),
            )
        })
        .collect()
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_sets: usize,
    fail_set_keys: HashSet<String>,
    fail_gets: bool,
    fail_removes: bool,
}

/// An in-memory store with switchable failures.
///
/// Share it with a session through `Arc` to keep control of the faults
/// and to reopen the same data after a simulated restart.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryKeyValueStore,
    faults: Mutex<Faults>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes, whatever their key.
    pub fn fail_next_sets(&self, n: usize) {
        self.faults().fail_next_sets = n;
    }

    /// Fail every write to `key` until faults are cleared.
    pub fn fail_sets_on(&self, key: &str) {
        self.faults().fail_set_keys.insert(key.to_string());
    }

    pub fn fail_gets(&self, fail: bool) {
        self.faults().fail_gets = fail;
    }

    pub fn fail_removes(&self, fail: bool) {
        self.faults().fail_removes = fail;
    }

    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    /// Park every write until the returned guard is dropped.
    pub async fn hold_writes(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.write_gate.clone().lock_owned().await
    }

    /// The underlying data, bypassing faults.
    pub fn inner(&self) -> &MemoryKeyValueStore {
        &self.inner
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().fail_gets {
            return Err(PersistError::Backend(format!(
                "injected read failure for '{key}'"
            )));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let _gate = self.write_gate.lock().await;

        let fail = {
            let mut faults = self.faults();
            if faults.fail_next_sets > 0 {
                faults.fail_next_sets -= 1;
                true
            } else {
                faults.fail_set_keys.contains(key)
            }
        };
        if fail {
            return Err(PersistError::Backend(format!(
                "injected write failure for '{key}'"
            )));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().fail_removes {
            return Err(PersistError::Backend(format!(
                "injected remove failure for '{key}'"
            )));
        }
        self.inner.remove(key).await
    }
}

/// A catalog source that is never reachable.
#[derive(Debug, Clone)]
pub struct FailingSource {
    reason: String,
}

impl FailingSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MarkerSource for FailingSource {
    async fn fetch(&self) -> Result<Vec<RawMarker>, catalog::Error> {
        Err(catalog::Error::Network(self.reason.clone()))
    }

    fn describe(&self) -> String {
        format!("failing source ({})", self.reason)
    }
}

/// Test harness for running claim scenarios.
pub struct TestHarness {
    /// The store, shared with every session this harness opens.
    pub store: Arc<FlakyStore>,
    /// The live session.
    pub session: ClaimSession,
    markers: Vec<RawMarker>,
    config: SessionConfig,
}

impl TestHarness {
    /// Start an initialized session over a sample trail of `markers` markers.
    pub async fn start(markers: usize) -> Result<Self, ClaimError> {
        Self::with_config(sample_trail(markers), SessionConfig::new()).await
    }

    /// Start an initialized session over a custom trail.
    pub async fn with_config(
        markers: Vec<RawMarker>,
        config: SessionConfig,
    ) -> Result<Self, ClaimError> {
        let store = Arc::new(FlakyStore::new());
        let session = open(&markers, &config, store.clone()).await?;
        Ok(Self {
            store,
            session,
            markers,
            config,
        })
    }

    /// Open a fresh session over the same store, as after a process restart.
    pub async fn restart(&self) -> Result<ClaimSession, ClaimError> {
        open(&self.markers, &self.config, self.store.clone()).await
    }

    /// Narrative text of marker `index`.
    pub fn text(&self, index: usize) -> String {
        self.markers[index].narrative_text().unwrap_or_default()
    }

    /// Narrative text of the first `n` markers.
    pub fn texts(&self, n: usize) -> Vec<String> {
        (0..n).map(|i| self.text(i)).collect()
    }
}

async fn open(
    markers: &[RawMarker],
    config: &SessionConfig,
    store: Arc<FlakyStore>,
) -> Result<ClaimSession, ClaimError> {
    let session = ClaimSession::new(config.clone(), StaticSource::new(markers.to_vec()), store);
    session.initialize().await?;
    Ok(session)
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the session's cursor and claimed text.
#[track_caller]
pub fn assert_progress(session: &ClaimSession, cursor: usize, claimed_text: &[String]) {
    let view = session.snapshot();
    assert_eq!(
        view.cursor, cursor,
        "Expected cursor {cursor}, got {}",
        view.cursor
    );
    assert_eq!(
        view.claimed_text, claimed_text,
        "Claimed text does not match at cursor {cursor}"
    );
}

/// Assert that a rejected transition left the view exactly as it was.
#[track_caller]
pub fn assert_unchanged(before: &ProgressView, session: &ClaimSession) {
    let after = session.snapshot();
    assert_eq!(&after, before, "Expected state to be unchanged");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{ProgressStore, CLAIMED_TEXT_KEY, CURSOR_KEY};

    #[test]
    fn test_sample_trail() {
        let trail = sample_trail(3);
        assert_eq!(trail.len(), 3);
        assert_eq!(
            trail[2].narrative_text().as_deref(),
            Some("Narrative for marker 2")
        );
        assert_ne!(trail[0].coords, trail[1].coords);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_next_sets() {
        let store = FlakyStore::new();
        store.fail_next_sets(1);

        assert!(store.set("a", "1").await.is_err());
        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.set_calls(), 2);
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_flaky_store_partial_save() {
        let store = FlakyStore::new();
        store.fail_sets_on(CURSOR_KEY);
        let progress = ProgressStore::new(store);

        assert!(progress.save(1, 1, &["x".to_string()]).await.is_err());

        let inner = progress.backend().inner();
        assert!(inner.get(CLAIMED_TEXT_KEY).await.unwrap().is_some());
        assert!(inner.get(CURSOR_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flaky_store_clear_faults() {
        let store = FlakyStore::new();
        store.fail_gets(true);
        store.fail_removes(true);
        assert!(store.get("k").await.is_err());
        assert!(store.remove("k").await.is_err());

        store.clear_faults();
        assert!(store.get("k").await.unwrap().is_none());
        store.remove("k").await.unwrap();
        assert_eq!(store.remove_calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_source() {
        let source = FailingSource::new("no network");
        assert!(matches!(
            source.fetch().await,
            Err(catalog::Error::Network(reason)) if reason == "no network"
        ));
    }

    #[tokio::test]
    async fn test_harness_restart_sees_same_store() {
        let harness = TestHarness::start(2).await.unwrap();
        harness.session.claim().await.unwrap();

        let reopened = harness.restart().await.unwrap();
        assert_progress(&reopened, 1, &harness.texts(1));
    }
}
