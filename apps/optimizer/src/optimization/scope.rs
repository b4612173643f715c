use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Profile;

/// Identity of one optimization run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub agent_id: String,
    pub conversation_id: String,
}

impl ScopeKey {
    pub fn new(agent_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Both ids must be non-blank.
    pub fn is_valid(&self) -> bool {
        !self.agent_id.trim().is_empty() && !self.conversation_id.trim().is_empty()
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.agent_id, self.conversation_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopStatus {
    Running,
    Converged,
    Exhausted,
}

impl LoopStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoopStatus::Running)
    }
}

/// Reviewer output for one iteration. `score` is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub score: f64,
    pub feedback: String,
}

impl ReviewVerdict {
    /// Non-finite scores become 0 so the scope stays serializable; the
    /// feedback is kept.
    pub fn sanitized(self) -> Self {
        if self.score.is_finite() {
            return self;
        }
        warn!("Reviewer returned non-finite score {}, recording 0", self.score);
        Self {
            score: 0.0,
            ..self
        }
    }
}

/// State threaded through one optimization run and persisted after every
/// iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopScope {
    pub key: ScopeKey,
    pub profile: Profile,
    pub job_description: String,
    #[serde(default)]
    pub reference_templates: Vec<String>,
    #[serde(default)]
    pub verdict: Option<ReviewVerdict>,
    /// Completed iterations.
    pub iteration: u32,
    pub status: LoopStatus,
}

impl LoopScope {
    pub fn new(
        key: ScopeKey,
        profile: Profile,
        job_description: impl Into<String>,
        reference_templates: Vec<String>,
    ) -> Self {
        Self {
            key,
            profile,
            job_description: job_description.into(),
            reference_templates,
            verdict: None,
            iteration: 0,
            status: LoopStatus::Running,
        }
    }
}
