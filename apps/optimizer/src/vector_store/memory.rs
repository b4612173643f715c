//! In-process vector backend. Brute-force cosine search over all points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Filter, Point, ScoredPoint, SearchQuery, VectorBackend};
use crate::embedding::cosine_similarity;
use crate::errors::AppError;

struct MemoryCollection {
    width: usize,
    points: Vec<Point>,
}

#[derive(Default)]
pub struct InMemoryVectorBackend {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    calls: AtomicUsize,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend operations served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn point_count(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

fn missing(collection: &str) -> AppError {
    AppError::StoreUnavailable(format!("collection '{collection}' does not exist"))
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn collection_width(&self, collection: &str) -> Result<Option<usize>, AppError> {
        self.record_call();
        Ok(self.collections.read().await.get(collection).map(|c| c.width))
    }

    async fn create_collection(&self, collection: &str, width: usize) -> Result<(), AppError> {
        self.record_call();
        self.collections.write().await.insert(
            collection.to_string(),
            MemoryCollection {
                width,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), AppError> {
        self.record_call();
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<(), AppError> {
        self.record_call();
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.width) {
            return Err(AppError::StoreUnavailable(format!(
                "point {} has width {}, collection width is {}",
                bad.id,
                bad.vector.len(),
                target.width
            )));
        }

        for point in points {
            match target.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => target.points.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        self.record_call();
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        if query.vector.len() != target.width {
            return Err(AppError::StoreUnavailable(format!(
                "query width {} does not match collection width {}",
                query.vector.len(),
                target.width
            )));
        }

        let mut hits: Vec<ScoredPoint> = target
            .points
            .iter()
            .filter(|p| query.filter.as_ref().map_or(true, |f| f.matches(&p.payload)))
            .map(|p| ScoredPoint {
                id: p.id,
                payload: p.payload.clone(),
                score: cosine_similarity(&query.vector, &p.vector),
            })
            .filter(|hit| query.score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn delete_points(&self, collection: &str, ids: &[Uuid]) -> Result<(), AppError> {
        self.record_call();
        if let Some(target) = self.collections.write().await.get_mut(collection) {
            target.points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }

    async fn delete_matching(&self, collection: &str, filter: &Filter) -> Result<(), AppError> {
        self.record_call();
        if let Some(target) = self.collections.write().await.get_mut(collection) {
            target.points.retain(|p| !filter.matches(&p.payload));
        }
        Ok(())
    }
}
