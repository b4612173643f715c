//! Vector Store: one named collection of vectors, text and metadata.
//!
//! The store owns collection provisioning. A collection always has a uniform
//! vector width and the cosine metric; when the configured width changes the
//! collection is dropped and recreated (destructive, no migration).
//!
//! Scores returned by `search` are relevances in [0, 1], derived from cosine
//! similarity as `(cos + 1) / 2`. `min_score` is compared against that value.
//!
//! The backing service sits behind `VectorBackend`: `QdrantBackend` in
//! production, `InMemoryVectorBackend` for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorBackend;
pub use qdrant::QdrantBackend;

/// Reserved payload key holding the document text. Caller metadata may not use it.
pub const TEXT_KEY: &str = "text_segment";

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// A scalar metadata value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PartialEq for MetadataValue {
    fn eq(&self, other: &Self) -> bool {
        use MetadataValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Integer(a), Float(b)) | (Float(b), Integer(a)) => (*a as f64) == *b,
            _ => false,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Ordered string → scalar mapping.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata predicate handed through to the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, MetadataValue),
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Filter::Eq(key.into(), value.into())
    }

    /// Evaluates the predicate against a payload. Used by backends without
    /// native filtering.
    pub fn matches(&self, payload: &Metadata) -> bool {
        match self {
            Filter::Eq(key, value) => payload.get(key).is_some_and(|v| v == value),
            Filter::All(filters) => filters.iter().all(|f| f.matches(payload)),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(payload)),
            Filter::Not(filter) => !filter.matches(payload),
        }
    }

    /// Rejects empty `All`/`Any` groups at any depth. Backends disagree on
    /// what an empty group selects, so it never reaches one.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Filter::Eq(..) => Ok(()),
            Filter::All(filters) | Filter::Any(filters) if filters.is_empty() => Err(
                AppError::Validation("filter groups must not be empty".to_string()),
            ),
            Filter::All(filters) | Filter::Any(filters) => {
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not(filter) => filter.validate(),
        }
    }
}

/// A point as written to the backing service. The payload already carries the
/// text under `TEXT_KEY`.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Metadata,
}

/// A raw backend hit. `score` is the cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub payload: Metadata,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Minimum cosine similarity.
    pub score_threshold: Option<f32>,
    pub filter: Option<Filter>,
}

/// A search result as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub id: Uuid,
    pub text: Option<String>,
    pub metadata: Metadata,
    /// Relevance in [0, 1].
    pub score: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Backend trait
// ────────────────────────────────────────────────────────────────────────────

/// Primitive operations of a vector database. Every failure is reported as
/// `AppError::StoreUnavailable`.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Vector width of the collection, or `None` if it does not exist.
    async fn collection_width(&self, collection: &str) -> Result<Option<usize>, AppError>;

    /// Creates a cosine collection of the given width.
    async fn create_collection(&self, collection: &str, width: usize) -> Result<(), AppError>;

    /// Drops the collection. Dropping a missing collection succeeds.
    async fn delete_collection(&self, collection: &str) -> Result<(), AppError>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<(), AppError>;

    /// Hits ordered by descending cosine similarity.
    async fn search(&self, collection: &str, query: &SearchQuery)
        -> Result<Vec<ScoredPoint>, AppError>;

    async fn delete_points(&self, collection: &str, ids: &[Uuid]) -> Result<(), AppError>;

    async fn delete_matching(&self, collection: &str, filter: &Filter) -> Result<(), AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// VectorStore
// ────────────────────────────────────────────────────────────────────────────

/// Converts a cosine similarity into a [0, 1] relevance.
pub fn relevance_from_cosine(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Converts a [0, 1] relevance into the equivalent cosine similarity.
pub fn cosine_from_relevance(relevance: f32) -> f32 {
    (2.0 * relevance - 1.0).clamp(-1.0, 1.0)
}

pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    collection: String,
    /// Width the collection was provisioned with; 0 until `ensure_collection`.
    width: AtomicUsize,
}

impl VectorStore {
    pub fn new(backend: Arc<dyn VectorBackend>, collection: impl Into<String>) -> Self {
        Self {
            backend,
            collection: collection.into(),
            width: AtomicUsize::new(0),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Provisions the collection for `width`. Idempotent for an unchanged
    /// width; a different width drops and recreates the collection.
    pub async fn ensure_collection(&self, width: usize) -> Result<(), AppError> {
        if width == 0 {
            return Err(AppError::Validation(
                "vector width must be greater than zero".to_string(),
            ));
        }

        match self.backend.collection_width(&self.collection).await? {
            None => {
                self.backend
                    .create_collection(&self.collection, width)
                    .await?;
                info!(
                    "Created vector collection '{}' (width={width}, cosine)",
                    self.collection
                );
            }
            Some(existing) if existing == width => {
                debug!(
                    "Vector collection '{}' already provisioned (width={width})",
                    self.collection
                );
            }
            Some(existing) => {
                warn!(
                    "Vector collection '{}' has width {existing}, configured width is {width}; \
                     dropping and recreating it (stored documents are discarded)",
                    self.collection
                );
                self.backend.delete_collection(&self.collection).await?;
                self.backend
                    .create_collection(&self.collection, width)
                    .await?;
            }
        }

        self.width.store(width, Ordering::Release);
        Ok(())
    }

    /// Upserts one document and returns its id (generated if not supplied).
    pub async fn add(
        &self,
        id: Option<Uuid>,
        vector: Vec<f32>,
        text: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Uuid, AppError> {
        let point = self.build_point(id, vector, text, metadata)?;
        let id = point.id;
        self.backend.upsert(&self.collection, vec![point]).await?;
        Ok(id)
    }

    /// Batch form of `add`. Optional lists must match `vectors` in length.
    /// Empty input is a no-op.
    pub async fn add_all(
        &self,
        ids: Option<Vec<Uuid>>,
        vectors: Vec<Vec<f32>>,
        texts: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<Vec<Uuid>, AppError> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let n = vectors.len();
        check_len("ids", ids.as_ref().map(Vec::len), n)?;
        check_len("texts", texts.as_ref().map(Vec::len), n)?;
        check_len("metadatas", metadatas.as_ref().map(Vec::len), n)?;

        let mut ids = ids.map(Vec::into_iter);
        let mut texts = texts.map(Vec::into_iter);
        let mut metadatas = metadatas.map(Vec::into_iter);

        let mut points = Vec::with_capacity(n);
        for vector in vectors {
            let id = ids.as_mut().and_then(Iterator::next);
            let text = texts.as_mut().and_then(Iterator::next);
            let metadata = metadatas.as_mut().and_then(Iterator::next);
            points.push(self.build_point(id, vector, text, metadata)?);
        }

        let assigned: Vec<Uuid> = points.iter().map(|p| p.id).collect();
        self.backend.upsert(&self.collection, points).await?;
        debug!("Upserted {} points into '{}'", assigned.len(), self.collection);
        Ok(assigned)
    }

    /// Returns matches by descending relevance, excluding those below `min_score`.
    pub async fn search(
        &self,
        query_vector: &[f32],
        max_results: usize,
        min_score: Option<f32>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchMatch>, AppError> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        if max_results == 0 {
            return Ok(Vec::new());
        }
        self.check_width(query_vector.len())?;

        let query = SearchQuery {
            vector: query_vector.to_vec(),
            limit: max_results,
            score_threshold: min_score.map(cosine_from_relevance),
            filter: filter.cloned(),
        };

        let hits = self.backend.search(&self.collection, &query).await?;

        let mut matches: Vec<SearchMatch> = hits
            .into_iter()
            .map(|hit| {
                let mut metadata = hit.payload;
                let text = match metadata.remove(TEXT_KEY) {
                    Some(MetadataValue::String(s)) => Some(s),
                    _ => None,
                };
                SearchMatch {
                    id: hit.id,
                    text,
                    metadata,
                    score: relevance_from_cosine(hit.score),
                }
            })
            .filter(|m| min_score.map_or(true, |min| m.score >= min))
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }

    /// Removing a missing id is not an error.
    pub async fn remove(&self, id: Uuid) -> Result<(), AppError> {
        self.backend.delete_points(&self.collection, &[id]).await
    }

    pub async fn remove_all(&self, ids: &[Uuid]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backend.delete_points(&self.collection, ids).await
    }

    /// Deletes every point the filter selects. Empty filter groups are
    /// rejected.
    pub async fn remove_matching(&self, filter: &Filter) -> Result<(), AppError> {
        filter.validate()?;
        self.backend.delete_matching(&self.collection, filter).await
    }

    /// Removes every document, keeping the collection provisioned.
    pub async fn clear(&self) -> Result<(), AppError> {
        let Some(width) = self.backend.collection_width(&self.collection).await? else {
            return Ok(());
        };
        self.backend.delete_collection(&self.collection).await?;
        self.backend
            .create_collection(&self.collection, width)
            .await?;
        info!("Cleared vector collection '{}'", self.collection);
        Ok(())
    }

    fn build_point(
        &self,
        id: Option<Uuid>,
        vector: Vec<f32>,
        text: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Point, AppError> {
        self.check_width(vector.len())?;

        let mut payload = metadata.unwrap_or_default();
        if payload.contains_key(TEXT_KEY) {
            return Err(AppError::Validation(format!(
                "metadata key '{TEXT_KEY}' is reserved for document text"
            )));
        }
        if let Some(text) = text {
            payload.insert(TEXT_KEY.to_string(), MetadataValue::String(text));
        }

        Ok(Point {
            id: id.unwrap_or_else(Uuid::new_v4),
            vector,
            payload,
        })
    }

    fn check_width(&self, len: usize) -> Result<(), AppError> {
        let width = self.width.load(Ordering::Acquire);
        if width != 0 && len != width {
            return Err(AppError::Validation(format!(
                "vector width {len} does not match collection width {width}"
            )));
        }
        Ok(())
    }
}

fn check_len(name: &str, len: Option<usize>, expected: usize) -> Result<(), AppError> {
    match len {
        Some(len) if len != expected => Err(AppError::Validation(format!(
            "{name} has {len} entries, expected {expected}"
        ))),
        _ => Ok(()),
    }
}
