//! Job queue consumer. Jobs are JSON payloads pushed onto a Redis list and
//! popped with `BLPOP`; each is processed to completion before the next pop.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::Profile;
use crate::optimization::{LoopOutcome, OptimizationLoop, ScopeKey, ScopeStore};
use crate::retrieval::RetrievalService;

/// Seconds a single `BLPOP` blocks before the loop polls again.
const BLPOP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REFERENCE_LIMIT: usize = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Store a profile's projection as a future reference template.
    Index { profile: Profile },
    /// Run (or resume) an optimization for one conversation.
    Optimize {
        agent_id: String,
        conversation_id: String,
        profile: Profile,
        job_description: String,
        /// Query for reference templates; the job description when absent.
        #[serde(default)]
        reference_query: Option<String>,
        #[serde(default)]
        reference_limit: Option<usize>,
    },
}

#[derive(Debug)]
pub enum JobOutcome {
    Indexed(Option<Uuid>),
    Optimized(LoopOutcome),
}

pub struct Worker {
    retrieval: Arc<RetrievalService>,
    scopes: Arc<ScopeStore>,
    optimizer: Arc<OptimizationLoop>,
}

impl Worker {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        scopes: Arc<ScopeStore>,
        optimizer: Arc<OptimizationLoop>,
    ) -> Self {
        Self {
            retrieval,
            scopes,
            optimizer,
        }
    }

    /// Pops and processes jobs until the returned future is dropped.
    /// Job failures are logged and never stop the loop.
    pub async fn run(&self, mut conn: MultiplexedConnection, queue: &str) -> Result<(), AppError> {
        info!("Worker listening on queue '{queue}'");
        loop {
            let payload = match next_payload(&mut conn, queue).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to pop from '{queue}': {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let job: Job = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Discarding malformed job payload: {e}");
                    continue;
                }
            };

            if let Err(e) = self.handle(job).await {
                error!("Job failed ({}): {e}", e.kind());
            }
        }
    }

    pub async fn handle(&self, job: Job) -> Result<JobOutcome, AppError> {
        match job {
            Job::Index { profile } => {
                let id = self.retrieval.index(&profile).await?;
                Ok(JobOutcome::Indexed(id))
            }
            Job::Optimize {
                agent_id,
                conversation_id,
                profile,
                job_description,
                reference_query,
                reference_limit,
            } => {
                let key = ScopeKey::new(agent_id, conversation_id);
                if !key.is_valid() {
                    return Err(AppError::Validation(
                        "agent_id and conversation_id must be non-empty".to_string(),
                    ));
                }

                // An unfinished scope means a previous attempt was interrupted.
                if let Some(scope) = self.scopes.load(&key).await? {
                    if !scope.status.is_terminal() {
                        if let Some(outcome) = self.optimizer.resume(&key).await? {
                            return Ok(JobOutcome::Optimized(outcome));
                        }
                    }
                }

                let query = reference_query.as_deref().unwrap_or(&job_description);
                let templates = self
                    .retrieval
                    .retrieve(query, reference_limit.unwrap_or(DEFAULT_REFERENCE_LIMIT))
                    .await?;

                let outcome = self
                    .optimizer
                    .run(&key, profile, &job_description, templates)
                    .await?;
                Ok(JobOutcome::Optimized(outcome))
            }
        }
    }
}

async fn next_payload(
    conn: &mut MultiplexedConnection,
    queue: &str,
) -> Result<Option<String>, AppError> {
    let popped: Option<(String, String)> = redis::cmd("BLPOP")
        .arg(queue)
        .arg(BLPOP_TIMEOUT_SECS)
        .query_async(conn)
        .await?;
    Ok(popped.map(|(_, payload)| payload))
}
