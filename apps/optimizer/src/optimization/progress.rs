//! Progress events: one per loop iteration, fire-and-forget.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::optimization::scope::{LoopScope, LoopStatus, ScopeKey};

/// Accepts opaque payloads. No acknowledgement, no ordering guarantee;
/// delivery failures are logged by the sink and never reach the caller.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, payload: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub agent_id: String,
    pub conversation_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub message: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    pub status: ProgressStatus,
}

impl ProgressEvent {
    pub fn for_scope(key: &ScopeKey, scope: &LoopScope, max_iterations: u32) -> Self {
        let message = match scope.status {
            LoopStatus::Running => {
                format!("Iteration {} of {max_iterations} complete", scope.iteration)
            }
            LoopStatus::Converged => format!(
                "Optimization converged after {} iteration(s)",
                scope.iteration
            ),
            LoopStatus::Exhausted => format!(
                "Optimization stopped after {} iteration(s) without reaching the threshold",
                scope.iteration
            ),
        };
        let status = if scope.status.is_terminal() {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Processing
        };

        Self {
            agent_id: key.agent_id.clone(),
            conversation_id: key.conversation_id.clone(),
            iteration: scope.iteration,
            max_iterations,
            message,
            score: scope.verdict.as_ref().map(|v| v.score),
            feedback: scope.verdict.as_ref().map(|v| v.feedback.clone()),
            status,
        }
    }
}

/// Publishes on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisProgressSink {
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisProgressSink {
    pub fn new(conn: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ProgressSink for RedisProgressSink {
    async fn publish(&self, payload: String) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = conn.publish(&self.channel, payload).await;
        match result {
            Ok(receivers) => debug!("Progress published to {receivers} subscriber(s)"),
            Err(e) => warn!("Failed to publish progress on '{}': {e}", self.channel),
        }
    }
}

/// Forwards payloads into an in-process channel.
#[derive(Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn publish(&self, payload: String) {
        if self.tx.send(payload).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}
