//! Reviewer and Tailor: the two strategies the optimization loop alternates.
//!
//! Both are injected into `OptimizationLoop` as trait objects. The LLM-backed
//! implementations use the scoring model and expect JSON back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ProviderError;
use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;
use crate::llm_client::{chat_json, fill_template, ChatModel, LlmError};
use crate::models::Profile;
use crate::optimization::memory::{Exchange, ExchangeRole};
use crate::optimization::prompts::{REVIEW_PROMPT_TEMPLATE, TAILOR_PROMPT_TEMPLATE};
use crate::optimization::scope::ReviewVerdict;

pub struct ReviewRequest<'a> {
    pub profile: &'a Profile,
    pub job_description: &'a str,
    pub recent_exchanges: &'a [Exchange],
}

pub struct TailorRequest<'a> {
    pub profile: &'a Profile,
    pub job_description: &'a str,
    pub verdict: &'a ReviewVerdict,
    pub reference_templates: &'a [String],
    pub recent_exchanges: &'a [Exchange],
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewVerdict, ProviderError>;
}

#[async_trait]
pub trait Tailor: Send + Sync {
    async fn tailor(&self, request: TailorRequest<'_>) -> Result<Profile, ProviderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LLM-backed implementations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    feedback: String,
}

pub struct LlmReviewer {
    model: Arc<dyn ChatModel>,
}

impl LlmReviewer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Reviewer for LlmReviewer {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewVerdict, ProviderError> {
        let exchanges = format_exchanges(request.recent_exchanges);
        let profile = profile_json(request.profile)?;
        let prompt = fill_template(
            REVIEW_PROMPT_TEMPLATE,
            &[
                ("json_only", JSON_ONLY_INSTRUCTION),
                ("recent_exchanges", &exchanges),
                ("job_description", request.job_description),
                ("profile_json", &profile),
            ],
        );

        let raw: RawVerdict = chat_json(self.model.as_ref(), &prompt).await?;
        let score = normalize_score(raw.score);
        debug!("Review scored {score:.2} (raw {})", raw.score);

        Ok(ReviewVerdict {
            score,
            feedback: raw.feedback,
        })
    }
}

pub struct LlmTailor {
    model: Arc<dyn ChatModel>,
}

impl LlmTailor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Tailor for LlmTailor {
    async fn tailor(&self, request: TailorRequest<'_>) -> Result<Profile, ProviderError> {
        let templates = if request.reference_templates.is_empty() {
            "(none)".to_string()
        } else {
            request
                .reference_templates
                .iter()
                .enumerate()
                .map(|(i, t)| format!("--- Reference {} ---\n{t}", i + 1))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let score = format!("{:.2}", request.verdict.score);
        let exchanges = format_exchanges(request.recent_exchanges);
        let profile = profile_json(request.profile)?;
        let prompt = fill_template(
            TAILOR_PROMPT_TEMPLATE,
            &[
                ("json_only", JSON_ONLY_INSTRUCTION),
                ("score", &score),
                ("feedback", &request.verdict.feedback),
                ("reference_templates", &templates),
                ("recent_exchanges", &exchanges),
                ("job_description", request.job_description),
                ("profile_json", &profile),
            ],
        );

        let revised: Profile = chat_json(self.model.as_ref(), &prompt).await?;
        Ok(revised)
    }
}

/// Profile JSON without the audit trail, which is loop bookkeeping.
fn profile_json(profile: &Profile) -> Result<String, ProviderError> {
    let stripped = Profile {
        optimization_history: Vec::new(),
        ..profile.clone()
    };
    serde_json::to_string_pretty(&stripped)
        .map_err(|e| ProviderError::Generation(LlmError::Parse(e)))
}

fn format_exchanges(exchanges: &[Exchange]) -> String {
    if exchanges.is_empty() {
        return "(none)".to_string();
    }
    exchanges
        .iter()
        .map(|e| {
            let role = match e.role {
                ExchangeRole::Reviewer => "Reviewer",
                ExchangeRole::Tailor => "Tailor",
            };
            format!("{role}: {}", e.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Maps a reviewer score into [0, 1]. Scores in (1, 100] are read as
/// percentages; non-finite scores become 0.
fn normalize_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    let score = if score > 1.0 && score <= 100.0 {
        score / 100.0
    } else {
        score
    };
    score.clamp(0.0, 1.0)
}
