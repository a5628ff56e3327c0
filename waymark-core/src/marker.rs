//! Markers and the validated, ordered trail they form.

use catalog::{Coordinates, Error as CatalogError, RawMarker};
use serde::{Deserialize, Serialize};

/// A fixed waypoint on the trail.
///
/// Markers are immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Zero-based position in the trail.
    pub index: usize,

    /// Optional short label.
    pub title: Option<String>,

    /// Text revealed when the marker is claimed.
    pub narrative_text: String,

    /// Where the marker sits.
    pub coordinates: Coordinates,
}

impl Marker {
    pub fn new(index: usize, narrative_text: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            index,
            title: None,
            narrative_text: narrative_text.into(),
            coordinates,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title for display, falling back to a 1-based chapter label.
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Chapter {}", self.index + 1))
    }
}

/// The ordered marker list for a trail.
///
/// Indexes are guaranteed to be exactly `0..len` in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerCatalog {
    markers: Vec<Marker>,
}

impl MarkerCatalog {
    /// Build a catalog from already-numbered markers.
    pub fn new(markers: Vec<Marker>) -> Result<Self, CatalogError> {
        for (position, marker) in markers.iter().enumerate() {
            if marker.index != position {
                return Err(CatalogError::Invalid(format!(
                    "expected marker index {position}, found {}",
                    marker.index
                )));
            }
        }
        Ok(Self { markers })
    }

    /// Build a catalog from wire markers.
    ///
    /// Entries without an explicit index take their document position. The
    /// result is ordered by index and must cover `0..n` without gaps or
    /// duplicates.
    pub fn from_raw(raw: Vec<RawMarker>) -> Result<Self, CatalogError> {
        let mut markers = raw
            .into_iter()
            .enumerate()
            .map(|(position, raw)| -> Result<Marker, CatalogError> {
                let narrative_text = raw.narrative_text().ok_or_else(|| {
                    CatalogError::Invalid(format!("marker at position {position} has no text"))
                })?;
                Ok(Marker {
                    index: raw.index.unwrap_or(position),
                    title: raw.title,
                    narrative_text,
                    coordinates: raw.coords,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        markers.sort_by_key(|m| m.index);
        Self::new(markers)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Marker> {
        self.markers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    pub fn as_slice(&self) -> &[Marker] {
        &self.markers
    }
}
