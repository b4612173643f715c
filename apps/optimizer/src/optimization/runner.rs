//! The bounded review/tailor loop.
//!
//! Each iteration runs strictly in sequence: review, tailor, record, persist,
//! publish. The scope is persisted after every iteration (and once before the
//! first) so an interrupted run can be picked up with [`OptimizationLoop::resume`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::{OptimizationRecord, Profile};
use crate::optimization::agents::{ReviewRequest, Reviewer, Tailor, TailorRequest};
use crate::optimization::memory::{ConversationMemory, Exchange, ExchangeRole};
use crate::optimization::progress::{ProgressEvent, ProgressSink};
use crate::optimization::scope::{LoopScope, LoopStatus, ScopeKey};
use crate::optimization::scope_store::ScopeStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    /// A verdict must score strictly above this to converge.
    pub convergence_threshold: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            convergence_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub profile: Profile,
    pub status: LoopStatus,
    pub iterations: u32,
}

impl From<LoopScope> for LoopOutcome {
    fn from(scope: LoopScope) -> Self {
        Self {
            profile: scope.profile,
            status: scope.status,
            iterations: scope.iteration,
        }
    }
}

pub struct OptimizationLoop {
    reviewer: Arc<dyn Reviewer>,
    tailor: Arc<dyn Tailor>,
    scopes: Arc<ScopeStore>,
    progress: Arc<dyn ProgressSink>,
    memory: Arc<ConversationMemory>,
    settings: LoopSettings,
}

impl OptimizationLoop {
    pub fn new(
        reviewer: Arc<dyn Reviewer>,
        tailor: Arc<dyn Tailor>,
        scopes: Arc<ScopeStore>,
        progress: Arc<dyn ProgressSink>,
        memory: Arc<ConversationMemory>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            reviewer,
            tailor,
            scopes,
            progress,
            memory,
            settings,
        }
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    /// Starts a fresh run for `key`, overwriting any scope already stored
    /// under it.
    pub async fn run(
        &self,
        key: &ScopeKey,
        profile: Profile,
        job_description: &str,
        reference_templates: Vec<String>,
    ) -> Result<LoopOutcome, AppError> {
        if !key.is_valid() {
            return Err(AppError::Validation(
                "agent_id and conversation_id must be non-empty".to_string(),
            ));
        }

        info!(
            "Starting optimization {key} (max {} iterations, {} reference template(s))",
            self.settings.max_iterations,
            reference_templates.len()
        );
        let scope = LoopScope::new(key.clone(), profile, job_description, reference_templates);
        self.persist(key, &scope).await?;
        self.drive(key, scope).await
    }

    /// Continues the persisted run for `key`. Terminal scopes are returned
    /// as they are; `None` when nothing is stored.
    pub async fn resume(&self, key: &ScopeKey) -> Result<Option<LoopOutcome>, AppError> {
        let Some(scope) = self.scopes.load(key).await? else {
            return Ok(None);
        };

        if scope.status.is_terminal() {
            debug!("Scope {key} already {:?}, nothing to resume", scope.status);
            return Ok(Some(scope.into()));
        }

        info!("Resuming optimization {key} at iteration {}", scope.iteration);
        self.drive(key, scope).await.map(Some)
    }

    /// Exchanges are forgotten when the run ends, whether or not it failed.
    async fn drive(&self, key: &ScopeKey, mut scope: LoopScope) -> Result<LoopOutcome, AppError> {
        let result = self.iterate_until_terminal(key, &mut scope).await;
        self.memory.forget(key).await;
        result?;

        info!(
            "Optimization {key} finished: {:?} after {} iteration(s)",
            scope.status, scope.iteration
        );
        Ok(scope.into())
    }

    async fn iterate_until_terminal(
        &self,
        key: &ScopeKey,
        scope: &mut LoopScope,
    ) -> Result<(), AppError> {
        while !scope.status.is_terminal() {
            if scope.iteration >= self.settings.max_iterations {
                scope.status = LoopStatus::Exhausted;
                self.persist(key, scope).await?;
                break;
            }
            self.iterate(key, scope).await?;
        }
        Ok(())
    }

    async fn iterate(&self, key: &ScopeKey, scope: &mut LoopScope) -> Result<(), AppError> {
        let recent = self.memory.recent(key).await;

        let verdict = self
            .reviewer
            .review(ReviewRequest {
                profile: &scope.profile,
                job_description: &scope.job_description,
                recent_exchanges: &recent,
            })
            .await?
            .sanitized();
        scope.verdict = Some(verdict.clone());

        let mut revised = self
            .tailor
            .tailor(TailorRequest {
                profile: &scope.profile,
                job_description: &scope.job_description,
                verdict: &verdict,
                reference_templates: &scope.reference_templates,
                recent_exchanges: &recent,
            })
            .await?;

        // The audit trail belongs to the loop, not to the tailor's output.
        revised.optimization_history = std::mem::take(&mut scope.profile.optimization_history);
        revised
            .optimization_history
            .push(OptimizationRecord::now(verdict.feedback.clone(), verdict.score));
        if revised.id.is_none() {
            revised.id = scope.profile.id.take();
        }
        scope.profile = revised;
        scope.iteration += 1;

        scope.status = if self.converged(key, scope) {
            LoopStatus::Converged
        } else if scope.iteration >= self.settings.max_iterations {
            LoopStatus::Exhausted
        } else {
            LoopStatus::Running
        };

        self.persist(key, scope).await?;

        self.memory
            .append(
                key,
                Exchange {
                    role: ExchangeRole::Reviewer,
                    content: format!("score {:.2}: {}", verdict.score, verdict.feedback),
                },
            )
            .await;
        self.memory
            .append(
                key,
                Exchange {
                    role: ExchangeRole::Tailor,
                    content: format!("revised profile for iteration {}", scope.iteration),
                },
            )
            .await;

        self.publish(key, scope).await;
        info!(
            "Optimization {key} iteration {}/{}: score {:.2}",
            scope.iteration, self.settings.max_iterations, verdict.score
        );
        Ok(())
    }

    /// Any malformed verdict counts as not converged.
    fn converged(&self, key: &ScopeKey, scope: &LoopScope) -> bool {
        match &scope.verdict {
            None => {
                warn!("Scope {key} has no verdict after review, treating as not converged");
                false
            }
            Some(v) if !v.score.is_finite() => {
                warn!("Scope {key} has non-finite score, treating as not converged");
                false
            }
            Some(v) => v.score > self.settings.convergence_threshold,
        }
    }

    async fn persist(&self, key: &ScopeKey, scope: &LoopScope) -> Result<(), AppError> {
        if !self.scopes.save(key, scope).await? {
            warn!("Scope {key} was not persisted at iteration {}", scope.iteration);
        }
        Ok(())
    }

    async fn publish(&self, key: &ScopeKey, scope: &LoopScope) {
        let event = ProgressEvent::for_scope(key, scope, self.settings.max_iterations);
        match serde_json::to_string(&event) {
            Ok(payload) => self.progress.publish(payload).await,
            Err(e) => warn!("Failed to encode progress event for {key}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::errors::ProviderError;
    use crate::llm_client::LlmError;
    use crate::optimization::kv::InMemoryKeyValueBackend;
    use crate::optimization::progress::{ChannelProgressSink, ProgressStatus};
    use crate::optimization::scope::ReviewVerdict;

    /// Always returns the same score and records how many exchanges it saw.
    struct FixedReviewer {
        score: f64,
        seen_exchanges: Mutex<Vec<usize>>,
    }

    impl FixedReviewer {
        fn new(score: f64) -> Arc<Self> {
            Arc::new(Self {
                score,
                seen_exchanges: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen_exchanges.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Reviewer for FixedReviewer {
        async fn review(
            &self,
            request: ReviewRequest<'_>,
        ) -> Result<ReviewVerdict, ProviderError> {
            self.seen_exchanges
                .lock()
                .unwrap()
                .push(request.recent_exchanges.len());
            Ok(ReviewVerdict {
                score: self.score,
                feedback: format!("feedback at {}", self.score),
            })
        }
    }

    /// Rewrites the summary and drops the history, as a careless model would.
    struct CountingTailor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tailor for CountingTailor {
        async fn tailor(&self, request: TailorRequest<'_>) -> Result<Profile, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Profile {
                summary: Some(format!("revision {n}")),
                optimization_history: Vec::new(),
                id: None,
                ..request.profile.clone()
            })
        }
    }

    struct FailingTailor;

    #[async_trait]
    impl Tailor for FailingTailor {
        async fn tailor(&self, _request: TailorRequest<'_>) -> Result<Profile, ProviderError> {
            Err(ProviderError::Generation(LlmError::EmptyContent))
        }
    }

    struct Harness {
        runner: OptimizationLoop,
        scopes: Arc<ScopeStore>,
        memory: Arc<ConversationMemory>,
        events: UnboundedReceiver<String>,
    }

    fn harness(
        reviewer: Arc<dyn Reviewer>,
        tailor: Arc<dyn Tailor>,
        max_iterations: u32,
    ) -> Harness {
        let scopes = Arc::new(ScopeStore::new(Arc::new(InMemoryKeyValueBackend::new())));
        let memory = Arc::new(ConversationMemory::default());
        let (sink, events) = ChannelProgressSink::new();
        let runner = OptimizationLoop::new(
            reviewer,
            tailor,
            scopes.clone(),
            Arc::new(sink),
            memory.clone(),
            LoopSettings {
                max_iterations,
                ..LoopSettings::default()
            },
        );
        Harness {
            runner,
            scopes,
            memory,
            events,
        }
    }

    fn counting_tailor() -> Arc<CountingTailor> {
        Arc::new(CountingTailor {
            calls: AtomicUsize::new(0),
        })
    }

    const PROFILE_ID: uuid::Uuid = uuid::Uuid::from_u128(7);

    fn seed_profile() -> Profile {
        Profile {
            id: Some(PROFILE_ID),
            summary: Some("Backend engineer".to_string()),
            ..Profile::default()
        }
    }

    fn drain(events: &mut UnboundedReceiver<String>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(raw) = events.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_high_score_converges_after_one_iteration() {
        let reviewer = FixedReviewer::new(0.9);
        let mut h = harness(reviewer.clone(), counting_tailor(), 3);
        let key = ScopeKey::new("agent", "conv");

        let outcome = h
            .runner
            .run(&key, seed_profile(), "Rust engineer", vec![])
            .await
            .unwrap();

        assert_eq!(outcome.status, LoopStatus::Converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(reviewer.calls(), 1);
        assert_eq!(outcome.profile.summary.as_deref(), Some("revision 1"));
        assert_eq!(outcome.profile.id, Some(PROFILE_ID));

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, ProgressStatus::Completed);
        assert_eq!(events[0].score, Some(0.9));
    }

    #[tokio::test]
    async fn test_low_score_exhausts_max_iterations() {
        let reviewer = FixedReviewer::new(0.1);
        let mut h = harness(reviewer.clone(), counting_tailor(), 3);
        let key = ScopeKey::new("agent", "conv");

        let outcome = h
            .runner
            .run(&key, seed_profile(), "Rust engineer", vec![])
            .await
            .unwrap();

        assert_eq!(outcome.status, LoopStatus::Exhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(reviewer.calls(), 3);
        assert_eq!(outcome.profile.optimization_history.len(), 3);
        assert_eq!(outcome.profile.summary.as_deref(), Some("revision 3"));

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 3);
        assert!(events[..2]
            .iter()
            .all(|e| e.status == ProgressStatus::Processing));
        assert_eq!(events[2].status, ProgressStatus::Completed);

        let stored = h.scopes.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, LoopStatus::Exhausted);
        assert_eq!(stored.profile, outcome.profile);
    }

    #[tokio::test]
    async fn test_score_at_threshold_does_not_converge() {
        let mut h = harness(FixedReviewer::new(0.8), counting_tailor(), 2);
        let key = ScopeKey::new("agent", "conv");

        let outcome = h
            .runner
            .run(&key, seed_profile(), "jd", vec![])
            .await
            .unwrap();

        assert_eq!(outcome.status, LoopStatus::Exhausted);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(drain(&mut h.events).len(), 2);
    }

    #[tokio::test]
    async fn test_zero_max_iterations_exhausts_immediately() {
        let reviewer = FixedReviewer::new(0.9);
        let mut h = harness(reviewer.clone(), counting_tailor(), 0);
        let key = ScopeKey::new("agent", "conv");

        let outcome = h
            .runner
            .run(&key, seed_profile(), "jd", vec![])
            .await
            .unwrap();

        assert_eq!(outcome.status, LoopStatus::Exhausted);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.profile, seed_profile());
        assert_eq!(reviewer.calls(), 0);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_blank_key_is_rejected() {
        let reviewer = FixedReviewer::new(0.9);
        let h = harness(reviewer.clone(), counting_tailor(), 3);

        let result = h
            .runner
            .run(&ScopeKey::new("", "conv"), seed_profile(), "jd", vec![])
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(reviewer.calls(), 0);
    }

    #[tokio::test]
    async fn test_tailor_failure_propagates_and_seed_stays_loadable() {
        let mut h = harness(FixedReviewer::new(0.5), Arc::new(FailingTailor), 3);
        let key = ScopeKey::new("agent", "conv");

        let result = h
            .runner
            .run(&key, seed_profile(), "jd", vec!["template".to_string()])
            .await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        let stored = h.scopes.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.iteration, 0);
        assert_eq!(stored.status, LoopStatus::Running);
        assert_eq!(stored.reference_templates, vec!["template".to_string()]);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_resume_continues_from_persisted_iteration() {
        let reviewer = FixedReviewer::new(0.1);
        let tailor = counting_tailor();
        let h = harness(reviewer.clone(), tailor.clone(), 3);
        let key = ScopeKey::new("agent", "conv");

        let mut profile = seed_profile();
        profile
            .optimization_history
            .push(OptimizationRecord::now("first pass", 0.3));
        let scope = LoopScope {
            iteration: 1,
            ..LoopScope::new(key.clone(), profile, "jd", vec![])
        };
        h.scopes.save(&key, &scope).await.unwrap();

        let outcome = h.runner.resume(&key).await.unwrap().unwrap();

        assert_eq!(outcome.status, LoopStatus::Exhausted);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(reviewer.calls(), 2);
        assert_eq!(outcome.profile.optimization_history.len(), 3);
        assert_eq!(outcome.profile.optimization_history[0].feedback, "first pass");
    }

    #[tokio::test]
    async fn test_resume_leaves_terminal_scope_untouched() {
        let reviewer = FixedReviewer::new(0.1);
        let h = harness(reviewer.clone(), counting_tailor(), 3);
        let key = ScopeKey::new("agent", "conv");
        let scope = LoopScope {
            iteration: 2,
            status: LoopStatus::Converged,
            ..LoopScope::new(key.clone(), seed_profile(), "jd", vec![])
        };
        h.scopes.save(&key, &scope).await.unwrap();

        let outcome = h.runner.resume(&key).await.unwrap().unwrap();

        assert_eq!(outcome.status, LoopStatus::Converged);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(reviewer.calls(), 0);
        assert_eq!(h.scopes.load(&key).await.unwrap(), Some(scope));
    }

    #[tokio::test]
    async fn test_resume_without_scope_returns_none() {
        let h = harness(FixedReviewer::new(0.1), counting_tailor(), 3);
        let outcome = h.runner.resume(&ScopeKey::new("agent", "missing")).await;
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn test_reviewer_sees_recent_exchanges() {
        let reviewer = FixedReviewer::new(0.1);
        let h = harness(reviewer.clone(), counting_tailor(), 3);
        let key = ScopeKey::new("agent", "conv");

        h.runner
            .run(&key, seed_profile(), "jd", vec![])
            .await
            .unwrap();

        assert_eq!(*reviewer.seen_exchanges.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_memory_is_released_when_run_ends() {
        let key = ScopeKey::new("agent", "conv");

        let h = harness(FixedReviewer::new(0.1), counting_tailor(), 2);
        h.runner
            .run(&key, seed_profile(), "jd", vec![])
            .await
            .unwrap();
        assert!(h.memory.recent(&key).await.is_empty());

        let h = harness(FixedReviewer::new(0.5), Arc::new(FailingTailor), 2);
        h.memory
            .append(
                &key,
                Exchange {
                    role: ExchangeRole::Reviewer,
                    content: "stale".to_string(),
                },
            )
            .await;
        let result = h.runner.run(&key, seed_profile(), "jd", vec![]).await;
        assert!(result.is_err());
        assert!(h.memory.recent(&key).await.is_empty());
    }
}
