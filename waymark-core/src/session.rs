//! ClaimSession - the claim state machine.
//!
//! This module owns the authoritative in-memory view of trail progress and
//! keeps it consistent with the durable progress store. It wraps the marker
//! source, the progress store and the write policy into a single API:
//!
//! - `initialize` fetches the catalog and restores progress (once)
//! - `claim` reveals the next marker, strictly in catalog order
//! - `undo` gives back the most recent claim
//! - `reset` forgets everything
//!
//! Every transition holds a single-slot gate for its whole duration; a
//! transition started while another is outstanding fails with
//! [`ClaimError::Busy`] without touching state or store.

use crate::marker::{Marker, MarkerCatalog};
use crate::persist::{KeyValueStore, PersistError, ProgressStore};
use crate::progress::{Chapter, ProgressRecord};
use catalog::{Coordinates, MarkerSource};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{error, info, warn};

/// Default radius within which a marker counts as reached.
pub const DEFAULT_CLAIM_RADIUS_M: f64 = 25.0;

/// Errors from ClaimSession operations.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("Marker catalog unavailable: {0}")]
    Fetch(#[from] catalog::Error),

    #[error("Progress storage failed: {0}")]
    Persistence(#[from] PersistError),

    #[error("All markers have already been claimed")]
    NoMarkersRemaining,

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Session is not ready")]
    NotReady,

    #[error("Session has already been initialized")]
    AlreadyInitialized,

    #[error("Another operation is still in progress")]
    Busy,
}

impl ClaimError {
    /// True for rejections that left state untouched because the
    /// transition's precondition did not hold.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NoMarkersRemaining | Self::NothingToUndo)
    }

    /// True when the store could not be read or written.
    pub fn is_durability_failure(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// When the in-memory view is updated relative to the store write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Update memory first, then write. A failed write is reported but the
    /// update stands, leaving the session [`Durability::Degraded`].
    #[default]
    Optimistic,

    /// Write first and update memory only once the write succeeded.
    Pessimistic,
}

/// Whether the store is known to hold what memory holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    #[default]
    Synced,

    /// The last write failed; a restart now would reload older progress.
    Degraded,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "reason")]
pub enum Phase {
    #[default]
    Loading,
    Ready,
    /// Initialization failed. Terminal: a new session is required.
    Failed(String),
}

/// Configuration for a claim session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How memory and store writes are ordered.
    pub write_policy: WritePolicy,

    /// Radius for [`ClaimSession::within_reach`].
    pub claim_radius_m: f64,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            write_policy: WritePolicy::default(),
            claim_radius_m: DEFAULT_CLAIM_RADIUS_M,
        }
    }

    /// Set the write policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Set the claim radius in metres.
    pub fn with_claim_radius_m(mut self, radius: f64) -> Self {
        self.claim_radius_m = radius;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only snapshot of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub cursor: usize,
    pub total: usize,
    pub claimed_text: Vec<String>,
    pub current_marker: Option<Marker>,
    pub loading: bool,
    pub durability: Durability,
    pub phase: Phase,
}

#[derive(Default)]
struct State {
    phase: Phase,
    markers: MarkerCatalog,
    record: ProgressRecord,
    durability: Durability,
}

impl State {
    fn ensure_ready(&self) -> Result<(), ClaimError> {
        match self.phase {
            Phase::Ready => Ok(()),
            _ => Err(ClaimError::NotReady),
        }
    }

    fn current_marker(&self) -> Option<&Marker> {
        self.markers.get(self.record.cursor())
    }
}

/// A sequential, undoable walk through a trail's markers.
///
/// `ClaimSession` is `Send + Sync` and can be shared behind an `Arc`.
pub struct ClaimSession {
    config: SessionConfig,
    source: Box<dyn MarkerSource>,
    store: ProgressStore<Box<dyn KeyValueStore>>,
    state: Mutex<State>,
    gate: tokio::sync::Mutex<()>,
}

impl ClaimSession {
    /// Create a session; call [`ClaimSession::initialize`] before use.
    pub fn new(
        config: SessionConfig,
        source: impl MarkerSource + 'static,
        store: impl KeyValueStore + 'static,
    ) -> Self {
        let store: Box<dyn KeyValueStore> = Box::new(store);
        Self {
            config,
            source: Box::new(source),
            store: ProgressStore::new(store),
            state: Mutex::new(State::default()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Fetch the catalog and restore stored progress.
    ///
    /// On failure the session enters [`Phase::Failed`] and stays loading for
    /// good.
    pub async fn initialize(&self) -> Result<ProgressView, ClaimError> {
        let _gate = self.begin()?;
        if self.state().phase != Phase::Loading {
            return Err(ClaimError::AlreadyInitialized);
        }

        let markers = match self.fetch_catalog().await {
            Ok(markers) => markers,
            Err(e) => {
                error!(source = %self.source.describe(), "Failed to load marker catalog: {e}");
                self.state().phase = Phase::Failed(e.to_string());
                return Err(e.into());
            }
        };

        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to load stored progress: {e}");
                self.state().phase = Phase::Failed(e.to_string());
                return Err(e.into());
            }
        };

        let record = ProgressRecord::reconcile(stored, &markers);
        info!(
            cursor = record.cursor(),
            total = markers.len(),
            "Restored trail progress"
        );

        {
            let mut state = self.state();
            state.markers = markers;
            state.record = record;
            state.phase = Phase::Ready;
        }
        Ok(self.snapshot())
    }

    /// Claim the next marker and return it.
    pub async fn claim(&self) -> Result<Marker, ClaimError> {
        let _gate = self.begin()?;
        let (marker, next) = {
            let state = self.state();
            state.ensure_ready()?;
            let marker = state
                .current_marker()
                .cloned()
                .ok_or(ClaimError::NoMarkersRemaining)?;
            let next = state.record.advanced(&marker.narrative_text);
            (marker, next)
        };

        let cursor = next.cursor();
        self.write_through(next).await?;
        info!(marker = marker.index, cursor, "Claimed marker");
        Ok(marker)
    }

    /// Give back the most recent claim and return its marker.
    pub async fn undo(&self) -> Result<Marker, ClaimError> {
        let _gate = self.begin()?;
        let (marker, next) = {
            let state = self.state();
            state.ensure_ready()?;
            let next = state.record.retreated().ok_or(ClaimError::NothingToUndo)?;
            let marker = state
                .markers
                .get(next.cursor())
                .cloned()
                .ok_or(ClaimError::NothingToUndo)?;
            (marker, next)
        };

        let cursor = next.cursor();
        self.write_through(next).await?;
        info!(marker = marker.index, cursor, "Undid claim");
        Ok(marker)
    }

    /// Forget all progress.
    ///
    /// Memory is reset before the store is cleared regardless of policy; a
    /// failed clear is reported but the session proceeds as reset.
    pub async fn reset(&self) -> Result<(), ClaimError> {
        let _gate = self.begin()?;
        {
            let mut state = self.state();
            state.ensure_ready()?;
            state.record = ProgressRecord::new();
        }

        let result = self.store.clear().await;
        self.settle(result)?;
        info!("Reset trail progress");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn snapshot(&self) -> ProgressView {
        let state = self.state();
        ProgressView {
            cursor: state.record.cursor(),
            total: state.markers.len(),
            claimed_text: state.record.claimed_text().to_vec(),
            current_marker: state.current_marker().cloned(),
            loading: state.phase != Phase::Ready,
            durability: state.durability,
            phase: state.phase.clone(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.state().record.cursor()
    }

    pub fn claimed_text(&self) -> Vec<String> {
        self.state().record.claimed_text().to_vec()
    }

    /// The next claimable marker, or `None` once everything is claimed.
    pub fn current_marker(&self) -> Option<Marker> {
        self.state().current_marker().cloned()
    }

    /// True until initialization succeeds, and forever after it fails.
    pub fn is_loading(&self) -> bool {
        self.state().phase != Phase::Ready
    }

    pub fn phase(&self) -> Phase {
        self.state().phase.clone()
    }

    pub fn durability(&self) -> Durability {
        self.state().durability
    }

    pub fn total(&self) -> usize {
        self.state().markers.len()
    }

    pub fn remaining(&self) -> usize {
        let state = self.state();
        state.markers.len().saturating_sub(state.record.cursor())
    }

    /// True once the session is ready and every marker is claimed.
    pub fn is_complete(&self) -> bool {
        let state = self.state();
        state.phase == Phase::Ready && state.current_marker().is_none()
    }

    /// The claimed narrative as numbered chapters.
    pub fn history(&self) -> Vec<Chapter> {
        let state = self.state();
        state
            .record
            .claimed_text()
            .iter()
            .enumerate()
            .map(|(index, text)| Chapter {
                number: index + 1,
                marker_index: index,
                title: state
                    .markers
                    .get(index)
                    .map(Marker::display_title)
                    .unwrap_or_else(|| format!("Chapter {}", index + 1)),
                text: text.clone(),
            })
            .collect()
    }

    /// Distance in metres from `position` to the next claimable marker.
    pub fn distance_to_current(&self, position: &Coordinates) -> Option<f64> {
        self.state()
            .current_marker()
            .map(|m| m.coordinates.distance_m(position))
    }

    /// Whether `position` is within the configured claim radius of the next
    /// claimable marker. Claiming itself never checks location.
    pub fn within_reach(&self, position: &Coordinates) -> bool {
        self.distance_to_current(position)
            .is_some_and(|d| d <= self.config.claim_radius_m)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ClaimError> {
        self.gate.try_lock().map_err(|_| {
            warn!("Rejected overlapping operation");
            ClaimError::Busy
        })
    }

    async fn fetch_catalog(&self) -> Result<MarkerCatalog, catalog::Error> {
        let raw = self.source.fetch().await?;
        MarkerCatalog::from_raw(raw)
    }

    async fn write_through(&self, next: ProgressRecord) -> Result<(), ClaimError> {
        match self.config.write_policy {
            WritePolicy::Optimistic => {
                self.state().record = next.clone();
                let result = self.save(&next).await;
                self.settle(result)
            }
            WritePolicy::Pessimistic => {
                if let Err(e) = self.save(&next).await {
                    warn!(cursor = next.cursor(), "Progress not saved; keeping previous state: {e}");
                    return Err(e.into());
                }
                let mut state = self.state();
                state.record = next;
                state.durability = Durability::Synced;
                Ok(())
            }
        }
    }

    async fn save(&self, record: &ProgressRecord) -> Result<(), PersistError> {
        self.store
            .save(record.cursor(), record.claimed_count(), record.claimed_text())
            .await
    }

    fn settle(&self, result: Result<(), PersistError>) -> Result<(), ClaimError> {
        let mut state = self.state();
        match result {
            Ok(()) => {
                state.durability = Durability::Synced;
                Ok(())
            }
            Err(e) => {
                warn!(
                    cursor = state.record.cursor(),
                    "Progress kept in memory but not persisted: {e}"
                );
                state.durability = Durability::Degraded;
                Err(e.into())
            }
        }
    }
}
