//! The progress record and its reconciliation with the marker catalog.

use crate::marker::MarkerCatalog;
use crate::persist::StoredProgress;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How far along the trail the user is.
///
/// `cursor` is both the number of claimed markers and the index of the next
/// claimable one. `claimed_text.len() == cursor` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    cursor: usize,
    claimed_text: Vec<String>,
}

impl ProgressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Always equal to the cursor; the store keeps it under its own key.
    pub fn claimed_count(&self) -> usize {
        self.cursor
    }

    pub fn claimed_text(&self) -> &[String] {
        &self.claimed_text
    }

    /// The record after claiming one more marker with the given text.
    pub fn advanced(&self, narrative_text: &str) -> Self {
        let mut claimed_text = self.claimed_text.clone();
        claimed_text.push(narrative_text.to_string());
        Self {
            cursor: self.cursor + 1,
            claimed_text,
        }
    }

    /// The record after giving back the most recent claim.
    pub fn retreated(&self) -> Option<Self> {
        let cursor = self.cursor.checked_sub(1)?;
        let mut claimed_text = self.claimed_text.clone();
        claimed_text.truncate(cursor);
        Some(Self {
            cursor,
            claimed_text,
        })
    }

    /// Rebuild a consistent record from whatever the store held.
    ///
    /// The stored cursor is authoritative, clamped to the catalog length.
    /// Text beyond the cursor is dropped and missing text is refilled from
    /// the catalog, which is exact because claimed entries always equal
    /// their marker's narrative.
    pub fn reconcile(stored: StoredProgress, markers: &MarkerCatalog) -> Self {
        let StoredProgress {
            cursor: stored_cursor,
            claimed_count,
            mut claimed_text,
        } = stored;

        let cursor = stored_cursor.min(markers.len());
        if cursor != stored_cursor {
            warn!(
                stored = stored_cursor,
                markers = markers.len(),
                "Stored cursor beyond catalog; clamping"
            );
        }

        if claimed_count != stored_cursor {
            warn!(
                claimed_count,
                cursor = stored_cursor,
                "Stored claimed count disagrees with cursor; ignoring count"
            );
        }

        if claimed_text.len() > cursor {
            warn!(
                entries = claimed_text.len(),
                cursor, "Dropping claimed text beyond cursor"
            );
            claimed_text.truncate(cursor);
        } else if claimed_text.len() < cursor {
            warn!(
                entries = claimed_text.len(),
                cursor, "Refilling missing claimed text from catalog"
            );
            let missing = markers
                .iter()
                .skip(claimed_text.len())
                .take(cursor - claimed_text.len())
                .map(|m| m.narrative_text.clone());
            claimed_text.extend(missing);
        }

        Self {
            cursor,
            claimed_text,
        }
    }
}

/// One claimed entry in the narrative history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    /// 1-based number, for display only.
    pub number: usize,

    /// The marker this chapter was claimed from.
    pub marker_index: usize,

    pub title: String,

    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Marker;
    use catalog::Coordinates;

    fn trail(n: usize) -> MarkerCatalog {
        let markers = (0..n)
            .map(|i| Marker::new(i, format!("text {i}"), Coordinates::new(0.0, i as f64)))
            .collect();
        MarkerCatalog::new(markers).unwrap()
    }

    fn stored(cursor: usize, claimed_count: usize, texts: &[&str]) -> StoredProgress {
        StoredProgress {
            cursor,
            claimed_count,
            claimed_text: texts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_advance_and_retreat() {
        let record = ProgressRecord::new().advanced("a").advanced("b");
        assert_eq!(record.cursor(), 2);
        assert_eq!(record.claimed_count(), 2);
        assert_eq!(record.claimed_text(), &["a".to_string(), "b".to_string()]);

        let back = record.retreated().unwrap();
        assert_eq!(back, ProgressRecord::new().advanced("a"));
        assert!(ProgressRecord::new().retreated().is_none());
    }

    #[test]
    fn test_reconcile_consistent_record_is_unchanged() {
        let record = ProgressRecord::reconcile(stored(2, 2, &["text 0", "text 1"]), &trail(3));
        assert_eq!(record, ProgressRecord::new().advanced("text 0").advanced("text 1"));
    }

    #[test]
    fn test_reconcile_clamps_cursor_to_catalog() {
        let record = ProgressRecord::reconcile(
            stored(5, 5, &["text 0", "text 1", "text 2", "x", "y"]),
            &trail(3),
        );
        assert_eq!(record.cursor(), 3);
        assert_eq!(record.claimed_text().len(), 3);
    }

    #[test]
    fn test_reconcile_truncates_text_written_ahead_of_cursor() {
        // A claim whose cursor write failed after the text landed.
        let record = ProgressRecord::reconcile(stored(1, 2, &["text 0", "text 1"]), &trail(3));
        assert_eq!(record.cursor(), 1);
        assert_eq!(record.claimed_text(), &["text 0".to_string()]);
    }

    #[test]
    fn test_reconcile_refills_text_behind_cursor() {
        // An undo whose cursor write failed after the text landed.
        let record = ProgressRecord::reconcile(stored(2, 1, &["text 0"]), &trail(3));
        assert_eq!(record.cursor(), 2);
        assert_eq!(
            record.claimed_text(),
            &["text 0".to_string(), "text 1".to_string()]
        );
    }

    #[test]
    fn test_reconcile_missing_cursor_with_leftover_text() {
        let record = ProgressRecord::reconcile(stored(0, 0, &["text 0"]), &trail(3));
        assert_eq!(record, ProgressRecord::new());
    }
}
