//! Qdrant backend over the gRPC client.
//!
//! Every call gets at most one retry, on a transient status (unavailable,
//! deadline exceeded, internal, unknown). Anything else surfaces as
//! `AppError::StoreUnavailable`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    self, point_id::PointIdOptions, value::Kind, vectors_config, CollectionExistsRequest,
    Condition, CreateCollectionBuilder, DeleteCollectionBuilder, DeletePointsBuilder, Distance,
    GetCollectionInfoRequest, PointId, PointStruct, PointsIdsList, Query, QueryPointsBuilder,
    Range, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Filter, Metadata, MetadataValue, Point, ScoredPoint, SearchQuery, VectorBackend};
use crate::errors::AppError;

const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// gRPC status codes worth one more attempt.
const TRANSIENT_CODES: [i32; 4] = [
    2,  // Unknown
    4,  // DeadlineExceeded
    13, // Internal
    14, // Unavailable
];

pub struct QdrantBackend {
    client: Qdrant,
}

impl QdrantBackend {
    /// `url` is the gRPC endpoint, usually port 6334.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::StoreUnavailable(format!("qdrant client: {e}")))?;
        Ok(Self { client })
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QdrantError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    warn!("Qdrant {op} failed ({e}), retrying once");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(AppError::StoreUnavailable(format!("qdrant {op}: {e}"))),
            }
        }
    }
}

fn is_transient(error: &QdrantError) -> bool {
    match error {
        QdrantError::ResponseError { status, .. } => {
            TRANSIENT_CODES.contains(&i32::from(status.code()))
        }
        _ => false,
    }
}

/// Qdrant filter for a predicate.
pub fn filter_to_qdrant(filter: &Filter) -> qdrant::Filter {
    match filter {
        Filter::Eq(..) => qdrant::Filter::must([condition(filter)]),
        Filter::All(filters) => qdrant::Filter::must(filters.iter().map(condition)),
        Filter::Any(filters) => qdrant::Filter::should(filters.iter().map(condition)),
        Filter::Not(inner) => qdrant::Filter::must_not([condition(inner)]),
    }
}

/// A filter used as a clause: field conditions inline, compound filters nested.
fn condition(filter: &Filter) -> Condition {
    match filter {
        Filter::Eq(key, MetadataValue::String(s)) => Condition::matches(key.as_str(), s.clone()),
        Filter::Eq(key, MetadataValue::Integer(i)) => Condition::matches(key.as_str(), *i),
        Filter::Eq(key, MetadataValue::Bool(b)) => Condition::matches(key.as_str(), *b),
        // Match conditions have no float variant; an exact range stands in.
        Filter::Eq(key, MetadataValue::Float(f)) => Condition::range(
            key.as_str(),
            Range {
                gte: Some(*f),
                lte: Some(*f),
                ..Default::default()
            },
        ),
        other => Condition::from(filter_to_qdrant(other)),
    }
}

fn payload_to_qdrant(metadata: &Metadata) -> HashMap<String, qdrant::Value> {
    metadata
        .iter()
        .map(|(key, value)| {
            let value = match value {
                MetadataValue::Bool(b) => qdrant::Value::from(*b),
                MetadataValue::Integer(i) => qdrant::Value::from(*i),
                MetadataValue::Float(f) => qdrant::Value::from(*f),
                MetadataValue::String(s) => qdrant::Value::from(s.clone()),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Scalar payload entries; lists, structs and nulls are not metadata.
fn payload_from_qdrant(payload: HashMap<String, qdrant::Value>) -> Metadata {
    payload
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value.kind? {
                Kind::BoolValue(b) => MetadataValue::Bool(b),
                Kind::IntegerValue(i) => MetadataValue::Integer(i),
                Kind::DoubleValue(f) => MetadataValue::Float(f),
                Kind::StringValue(s) => MetadataValue::String(s),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

fn scored_point_from_qdrant(hit: qdrant::ScoredPoint) -> Option<ScoredPoint> {
    let id = match hit.id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(s)) => Uuid::parse_str(s).ok(),
        _ => None,
    };
    let Some(id) = id else {
        debug!("Skipping Qdrant hit without a UUID id: {:?}", hit.id);
        return None;
    };
    Some(ScoredPoint {
        id,
        payload: payload_from_qdrant(hit.payload),
        score: hit.score,
    })
}

fn point_ids(ids: &[Uuid]) -> Vec<PointId> {
    ids.iter().map(|id| PointId::from(id.to_string())).collect()
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn collection_width(&self, collection: &str) -> Result<Option<usize>, AppError> {
        let exists = self
            .with_retry("collection_exists", || {
                self.client.collection_exists(CollectionExistsRequest {
                    collection_name: collection.to_string(),
                })
            })
            .await?;
        if !exists {
            return Ok(None);
        }

        let info = self
            .with_retry("collection_info", || {
                self.client.collection_info(GetCollectionInfoRequest {
                    collection_name: collection.to_string(),
                })
            })
            .await?;

        // Named-vector collections have no single width; 0 forces re-provisioning.
        let width = info
            .result
            .and_then(|info| info.config)
            .and_then(|config| config.params)
            .and_then(|params| params.vectors_config)
            .and_then(|vectors| vectors.config)
            .map(|config| match config {
                vectors_config::Config::Params(params) => params.size,
                vectors_config::Config::ParamsMap(_) => 0,
            })
            .unwrap_or(0);
        Ok(Some(width as usize))
    }

    async fn create_collection(&self, collection: &str, width: usize) -> Result<(), AppError> {
        self.with_retry("create_collection", || {
            self.client.create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(width as u64, Distance::Cosine)),
            )
        })
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), AppError> {
        if self.collection_width(collection).await?.is_none() {
            return Ok(());
        }
        self.with_retry("delete_collection", || {
            self.client
                .delete_collection(DeleteCollectionBuilder::new(collection))
        })
        .await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<(), AppError> {
        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let payload = Payload::from(payload_to_qdrant(&p.payload));
                PointStruct::new(p.id.to_string(), p.vector, payload)
            })
            .collect();
        self.with_retry("upsert_points", || {
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, points.clone()).wait(true))
        })
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let response = self
            .with_retry("query", || {
                let mut request = QueryPointsBuilder::new(collection)
                    .query(Query::new_nearest(query.vector.clone()))
                    .limit(query.limit as u64)
                    .with_payload(true);
                if let Some(threshold) = query.score_threshold {
                    request = request.score_threshold(threshold);
                }
                if let Some(filter) = &query.filter {
                    request = request.filter(filter_to_qdrant(filter));
                }
                self.client.query(request)
            })
            .await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(scored_point_from_qdrant)
            .collect())
    }

    async fn delete_points(&self, collection: &str, ids: &[Uuid]) -> Result<(), AppError> {
        let ids = point_ids(ids);
        self.with_retry("delete_points", || {
            self.client.delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: ids.clone() })
                    .wait(true),
            )
        })
        .await?;
        Ok(())
    }

    async fn delete_matching(&self, collection: &str, filter: &Filter) -> Result<(), AppError> {
        let filter = filter_to_qdrant(filter);
        self.with_retry("delete_points", || {
            self.client.delete_points(
                DeletePointsBuilder::new(collection)
                    .points(filter.clone())
                    .wait(true),
            )
        })
        .await?;
        Ok(())
    }
}
