//! Sequential waypoint claims with a durable narrative history.
//!
//! This crate provides:
//! - An ordered, validated marker catalog
//! - A claim state machine with claim/undo/reset and cold-start recovery
//! - Progress persistence over a small key/value store
//! - A headless driver and testing utilities
//!
//! # Quick Start
//!
//! ```ignore
//! use waymark_core::{ClaimSession, FileKeyValueStore, SessionConfig};
//! use catalog::HttpSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ClaimSession::new(
//!         SessionConfig::new(),
//!         HttpSource::new("https://example.org/markers.json")?,
//!         FileKeyValueStore::new(".waymark"),
//!     );
//!     session.initialize().await?;
//!
//!     let marker = session.claim().await?;
//!     println!("{}", marker.narrative_text);
//!     Ok(())
//! }
//! ```

pub mod headless;
pub mod marker;
pub mod persist;
pub mod progress;
pub mod session;
pub mod testing;

// Primary public API
pub use catalog::{Coordinates, MarkerSource, RawMarker};
pub use headless::{CatalogLocation, HeadlessConfig, HeadlessTrail};
pub use marker::{Marker, MarkerCatalog};
pub use persist::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PersistError, ProgressStore};
pub use progress::{Chapter, ProgressRecord};
pub use session::{
    ClaimError, ClaimSession, Durability, Phase, ProgressView, SessionConfig, WritePolicy,
};
