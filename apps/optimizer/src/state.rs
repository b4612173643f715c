use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::info;

use crate::config::Config;
use crate::embedding::HttpEmbeddingClient;
use crate::llm_client::{LlmClient, LlmSettings};
use crate::optimization::{
    ConversationMemory, LlmReviewer, LlmTailor, LoopSettings, OptimizationLoop,
    RedisKeyValueBackend, RedisProgressSink, ScopeStore,
};
use crate::retrieval::{RetrievalService, RetrievalSettings};
use crate::vector_store::{QdrantBackend, VectorStore};

/// Shared services handed to every job the worker processes.
#[derive(Clone)]
pub struct Services {
    pub redis: RedisClient,
    pub vectors: Arc<VectorStore>,
    pub retrieval: Arc<RetrievalService>,
    pub scopes: Arc<ScopeStore>,
    pub optimizer: Arc<OptimizationLoop>,
}

impl Services {
    pub async fn build(config: &Config) -> Result<Self> {
        let qdrant = QdrantBackend::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.embedding_timeout,
        )
        .context("Failed to build Qdrant client")?;
        let vectors = Arc::new(VectorStore::new(
            Arc::new(qdrant),
            config.vector_collection.clone(),
        ));
        info!("Vector store initialized (collection: {})", config.vector_collection);

        let embedder = HttpEmbeddingClient::new(
            &config.embedding_api_url,
            config.embedding_api_key.clone(),
            &config.embedding_model,
            config.embedding_timeout,
        )
        .context("Failed to build embedding client")?;

        let hyde = LlmClient::new(
            config.anthropic_api_key.clone(),
            LlmSettings::hyde(&config.llm_model, config.hyde_temperature, config.llm_timeout),
        )
        .context("Failed to build HyDE LLM client")?;
        let scoring = Arc::new(
            LlmClient::new(
                config.anthropic_api_key.clone(),
                LlmSettings::scoring(&config.llm_model, config.llm_timeout),
            )
            .context("Failed to build scoring LLM client")?,
        );
        info!("LLM clients initialized (model: {})", scoring.model());

        let retrieval = Arc::new(RetrievalService::new(
            vectors.clone(),
            Arc::new(embedder),
            Arc::new(hyde),
            scoring.clone(),
            RetrievalSettings {
                rerank_concurrency: config.rerank_concurrency,
                ..RetrievalSettings::default()
            },
        ));

        let redis = RedisClient::open(config.redis_url.clone())?;
        let kv = RedisKeyValueBackend::connect(&redis)
            .await
            .context("Failed to connect to Redis")?;
        let scopes = Arc::new(ScopeStore::new(Arc::new(kv)));
        let progress_conn = redis
            .get_multiplexed_async_connection()
            .await
            .context("Failed to open Redis progress connection")?;
        let progress = RedisProgressSink::new(progress_conn, config.progress_channel.clone());
        info!("Redis connected (progress channel: {})", config.progress_channel);

        let optimizer = Arc::new(OptimizationLoop::new(
            Arc::new(LlmReviewer::new(scoring.clone())),
            Arc::new(LlmTailor::new(scoring)),
            scopes.clone(),
            Arc::new(progress),
            Arc::new(ConversationMemory::new(config.memory_window)),
            LoopSettings {
                max_iterations: config.max_iterations,
                convergence_threshold: config.convergence_threshold,
            },
        ));

        Ok(Self {
            redis,
            vectors,
            retrieval,
            scopes,
            optimizer,
        })
    }
}
