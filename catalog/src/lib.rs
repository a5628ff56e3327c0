//! Minimal marker catalog client.
//!
//! This crate provides a focused, read-only client for the trail's marker
//! catalog with:
//! - HTTP retrieval of a published JSON catalog
//! - Local file and in-memory sources for offline use and tests
//! - Tolerant parsing of the three catalog layouts seen in the wild

use async_trait::async_trait;
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Errors that can occur when retrieving a marker catalog.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse catalog: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// A marker as it appears on the wire.
///
/// The narrative is either a single `text` string or a list of `messages`
/// that are joined with newlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMarker {
    /// Explicit position in the trail. Entries without one are numbered by
    /// their position in the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,

    #[serde(alias = "coordinates")]
    pub coords: Coordinates,
}

impl RawMarker {
    /// Create a marker with a single narrative string.
    pub fn new(text: impl Into<String>, coords: Coordinates) -> Self {
        Self {
            index: None,
            title: None,
            text: Some(text.into()),
            messages: Vec::new(),
            coords,
        }
    }

    /// Set the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set an explicit index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// The narrative revealed when this marker is claimed, if it has one.
    ///
    /// `messages` are flattened into one string joined by `\n`. This is one
    /// way: a message that itself contains a newline cannot be told apart
    /// from two messages afterwards.
    pub fn narrative_text(&self) -> Option<String> {
        match &self.text {
            Some(text) => Some(text.clone()),
            None if !self.messages.is_empty() => Some(self.messages.join("\n")),
            None => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<RawMarker>),
    Wrapped { markers: Vec<RawMarker> },
    Keyed(InDocumentOrder<CharacterEntry>),
}

/// Object values in the order they appear in the document. Keys are dropped.
struct InDocumentOrder<T>(Vec<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for InDocumentOrder<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderVisitor<T> {
            type Value = InDocumentOrder<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while map.next_key::<IgnoredAny>()?.is_some() {
                    values.push(map.next_value()?);
                }
                Ok(InDocumentOrder(values))
            }
        }

        deserializer.deserialize_map(OrderVisitor(PhantomData))
    }
}

/// One character in the keyed layout: scenarios keyed by name.
#[derive(Deserialize)]
struct CharacterEntry {
    messages: InDocumentOrder<ScenarioEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioText {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct ScenarioEntry {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<ScenarioText>,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(alias = "coordinates")]
    coords: Coordinates,
}

impl From<ScenarioEntry> for RawMarker {
    fn from(entry: ScenarioEntry) -> Self {
        let (text, messages) = match entry.text {
            Some(ScenarioText::One(text)) => (Some(text), entry.messages),
            Some(ScenarioText::Many(messages)) => (None, messages),
            None => (None, entry.messages),
        };
        Self {
            index: entry.index,
            title: entry.title,
            text,
            messages,
            coords: entry.coords,
        }
    }
}

/// Parse a catalog document.
///
/// Accepts a bare JSON array of markers, an object with a `markers` array,
/// or the keyed layout `{character: {messages: {scenario: marker}}}`, which
/// is flattened character by character in document order. In the keyed
/// layout `text` may be a string or a list of messages. Every marker must
/// carry narrative text.
pub fn parse_catalog(json: &str) -> Result<Vec<RawMarker>, Error> {
    let document: CatalogDocument =
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))?;

    let markers = match document {
        CatalogDocument::List(markers) => markers,
        CatalogDocument::Wrapped { markers } => markers,
        CatalogDocument::Keyed(InDocumentOrder(characters)) => characters
            .into_iter()
            .flat_map(|character| character.messages.0)
            .map(RawMarker::from)
            .collect(),
    };

    if let Some(position) = markers.iter().position(|m| m.narrative_text().is_none()) {
        return Err(Error::Invalid(format!(
            "marker at position {position} has no text or messages"
        )));
    }

    Ok(markers)
}

/// A read-only source of the ordered marker catalog.
#[async_trait]
pub trait MarkerSource: Send + Sync {
    /// Retrieve the full catalog. There is no partial-data contract.
    async fn fetch(&self) -> Result<Vec<RawMarker>, Error>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Fetches the catalog from a published JSON document.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MarkerSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<RawMarker>, Error> {
        debug!(url = %self.url, "Fetching marker catalog");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status, "Catalog request rejected");
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_catalog(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reads the catalog from a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarkerSource for FileSource {
    async fn fetch(&self) -> Result<Vec<RawMarker>, Error> {
        debug!(path = %self.path.display(), "Reading marker catalog");
        let content = tokio::fs::read_to_string(&self.path).await?;
        parse_catalog(&content)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    markers: Vec<RawMarker>,
}

impl StaticSource {
    pub fn new(markers: Vec<RawMarker>) -> Self {
        Self { markers }
    }
}

#[async_trait]
impl MarkerSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<RawMarker>, Error> {
        Ok(self.markers.clone())
    }

    fn describe(&self) -> String {
        format!("static catalog ({} markers)", self.markers.len())
    }
}
