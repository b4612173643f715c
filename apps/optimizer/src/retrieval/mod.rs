//! Retrieval Service: indexes profiles and retrieves reference material.
//!
//! Flow: expand (HyDE) → embed → recall (vector search) → rerank (LLM score).
//!
//! Job descriptions and résumés use different vocabulary, so raw embedding
//! similarity between them is weak. Expansion rewrites the query as an
//! idealized profile excerpt before embedding; rerank corrects the remaining
//! ordering error with one scoring call per recalled candidate.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::errors::AppError;
use crate::llm_client::{fill_template, ChatModel};
use crate::models::Profile;
use crate::retrieval::projection::project_profile;
use crate::retrieval::prompts::HYDE_PROMPT_TEMPLATE;
use crate::retrieval::rerank::{score_candidate, sort_by_score, ScoredCandidate};
use crate::vector_store::VectorStore;

pub mod projection;
pub mod prompts;
pub mod rerank;

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Candidates recalled per requested result.
    pub recall_multiplier: usize,
    /// Minimum recall relevance in [0, 1].
    pub min_relevance: f32,
    /// Candidate text sent to the scoring model is cut to this many chars.
    pub rerank_char_limit: usize,
    pub rerank_concurrency: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            recall_multiplier: 3,
            min_relevance: 0.7,
            rerank_char_limit: 2000,
            rerank_concurrency: 4,
        }
    }
}

pub struct RetrievalService {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    hyde_model: Arc<dyn ChatModel>,
    scoring_model: Arc<dyn ChatModel>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        hyde_model: Arc<dyn ChatModel>,
        scoring_model: Arc<dyn ChatModel>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            hyde_model,
            scoring_model,
            settings,
        }
    }

    /// Indexes the profile's text projection under the profile id, or a fresh
    /// id when it has none. Returns the stored id, or `None` when the
    /// projection is empty and nothing was written.
    pub async fn index(&self, profile: &Profile) -> Result<Option<Uuid>, AppError> {
        let text = project_profile(profile);
        if text.is_empty() {
            debug!("Profile has no indexable content, skipping");
            return Ok(None);
        }

        let vector = self.embedder.embed(&text).await?;
        let id = self.store.add(profile.id, vector, Some(text), None).await?;
        info!("Indexed profile projection as {id}");
        Ok(Some(id))
    }

    /// Returns up to `limit` stored texts most relevant to `query`, best first.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let expanded = self.expand(query).await;
        let vector = self.embedder.embed(&expanded).await?;

        let recall_size = limit.saturating_mul(self.settings.recall_multiplier.max(1));
        let candidates: Vec<String> = self
            .store
            .search(&vector, recall_size, Some(self.settings.min_relevance), None)
            .await?
            .into_iter()
            .filter_map(|m| m.text)
            .collect();

        if candidates.is_empty() {
            debug!("No candidates recalled for query");
            return Ok(Vec::new());
        }

        let mut scored = self.rerank(query, candidates).await;
        sort_by_score(&mut scored);

        info!(
            "Retrieved {} of {} recalled candidates (top score {})",
            scored.len().min(limit),
            scored.len(),
            scored.first().map_or(0, |c| c.score)
        );

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|c| c.content)
            .collect())
    }

    /// Synthesizes a hypothetical profile excerpt for `query`. Falls back to
    /// the verbatim query on failure or an empty response.
    async fn expand(&self, query: &str) -> String {
        let prompt = fill_template(HYDE_PROMPT_TEMPLATE, &[("query", query)]);
        match self.hyde_model.chat(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Query expansion returned empty text, using query verbatim");
                query.to_string()
            }
            Err(e) => {
                warn!("Query expansion failed, using query verbatim: {e}");
                query.to_string()
            }
        }
    }

    /// Scores candidates concurrently; output keeps recall order.
    async fn rerank(&self, query: &str, candidates: Vec<String>) -> Vec<ScoredCandidate> {
        let model = self.scoring_model.as_ref();
        let max_chars = self.settings.rerank_char_limit;

        let scores: Vec<u8> = stream::iter(
            candidates
                .iter()
                .map(|c| score_candidate(model, query, c, max_chars)),
        )
        .buffered(self.settings.rerank_concurrency.max(1))
        .collect()
        .await;

        candidates
            .into_iter()
            .zip(scores)
            .map(|(content, score)| ScoredCandidate { content, score })
            .collect()
    }
}
