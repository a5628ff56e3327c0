//! Headless trail interface for programmatic use.
//!
//! This module provides a simplified interface for walking a trail without
//! any UI. It's designed for:
//! - Script-driven walks and smoke tests
//! - Front ends that only need the four transitions and a transcript
//!
//! # Example
//!
//! ```ignore
//! use waymark_core::headless::{HeadlessConfig, HeadlessTrail};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HeadlessConfig::from_url("https://example.org/markers.json")
//!         .with_store_dir(".waymark");
//!     let trail = HeadlessTrail::open(config).await?;
//!
//!     let marker = trail.claim().await?;
//!     println!("{}", marker.narrative_text);
//!     Ok(())
//! }
//! ```

use crate::marker::Marker;
use crate::persist::FileKeyValueStore;
use crate::progress::Chapter;
use crate::session::{ClaimError, ClaimSession, Durability, ProgressView, SessionConfig, WritePolicy};
use catalog::{Coordinates, FileSource, HttpSource};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

/// Where the marker catalog comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLocation {
    Url(String),
    File(PathBuf),
}

/// Configuration for a headless trail.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Marker catalog location.
    pub catalog: CatalogLocation,
    /// Directory holding the progress files.
    pub store_dir: PathBuf,
    /// Session settings.
    pub session: SessionConfig,
}

impl HeadlessConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(CatalogLocation::Url(url.into()))
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(CatalogLocation::File(path.into()))
    }

    fn new(catalog: CatalogLocation) -> Self {
        Self {
            catalog,
            store_dir: PathBuf::from(".waymark"),
            session: SessionConfig::new(),
        }
    }

    /// Set the progress directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// Set the write policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.session = self.session.with_write_policy(policy);
        self
    }

    /// Set the claim radius in metres.
    pub fn with_claim_radius_m(mut self, radius: f64) -> Self {
        self.session = self.session.with_claim_radius_m(radius);
        self
    }

    /// Build the session this configuration describes, uninitialized.
    pub fn build_session(&self) -> Result<ClaimSession, ClaimError> {
        let store = FileKeyValueStore::new(&self.store_dir);
        let session = match &self.catalog {
            CatalogLocation::Url(url) => {
                ClaimSession::new(self.session.clone(), HttpSource::new(url)?, store)
            }
            CatalogLocation::File(path) => {
                ClaimSession::new(self.session.clone(), FileSource::new(path), store)
            }
        };
        Ok(session)
    }
}

/// What a transcript entry recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Claim,
    Undo,
    Reset,
}

/// An entry in the walk transcript.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub action: Action,
    /// Marker claimed or given back, when the action got that far.
    pub marker: Option<usize>,
    /// Error message, if the action failed.
    pub error: Option<String>,
    /// Cursor after the action.
    pub cursor: usize,
}

/// A trail session that can be driven programmatically.
///
/// This wraps `ClaimSession` and records every transition.
pub struct HeadlessTrail {
    session: ClaimSession,
    transcript: Mutex<Vec<TranscriptEntry>>,
}

impl HeadlessTrail {
    /// Build and initialize a trail from configuration.
    pub async fn open(config: HeadlessConfig) -> Result<Self, ClaimError> {
        Self::with_session(config.build_session()?).await
    }

    /// Initialize and wrap an existing session.
    pub async fn with_session(session: ClaimSession) -> Result<Self, ClaimError> {
        session.initialize().await?;
        Ok(Self {
            session,
            transcript: Mutex::new(Vec::new()),
        })
    }

    pub async fn claim(&self) -> Result<Marker, ClaimError> {
        let result = self.session.claim().await;
        self.record(Action::Claim, &result);
        result
    }

    pub async fn undo(&self) -> Result<Marker, ClaimError> {
        let result = self.session.undo().await;
        self.record(Action::Undo, &result);
        result
    }

    pub async fn reset(&self) -> Result<(), ClaimError> {
        let result = self.session.reset().await;
        let entry = TranscriptEntry {
            action: Action::Reset,
            marker: None,
            error: result.as_ref().err().map(|e| e.to_string()),
            cursor: self.session.cursor(),
        };
        self.push(entry);
        result
    }

    // ========================================================================
    // Trail State Queries
    // ========================================================================

    pub fn status(&self) -> ProgressView {
        self.session.snapshot()
    }

    pub fn history(&self) -> Vec<Chapter> {
        self.session.history()
    }

    pub fn within_reach(&self, position: &Coordinates) -> bool {
        self.session.within_reach(position)
    }

    pub fn distance_to_current(&self, position: &Coordinates) -> Option<f64> {
        self.session.distance_to_current(position)
    }

    pub fn is_degraded(&self) -> bool {
        self.session.durability() == Durability::Degraded
    }

    /// Copy of every recorded transition, oldest first.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get the underlying session for advanced use.
    pub fn session(&self) -> &ClaimSession {
        &self.session
    }

    fn record(&self, action: Action, result: &Result<Marker, ClaimError>) {
        let cursor = self.session.cursor();
        let (marker, error) = match result {
            Ok(marker) => (Some(marker.index), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.push(TranscriptEntry {
            action,
            marker,
            error,
            cursor,
        });
    }

    fn push(&self, entry: TranscriptEntry) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}
