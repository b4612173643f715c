//! Scope Store: durable loop state keyed by (agent id, conversation id).
//!
//! Layout in the key/value backend:
//! - `{namespace}:{agent_id length}:{agent_id}:{conversation_id}` → scope as JSON
//! - `{namespace}:index` → set of keys, each serialized as JSON
//!
//! The value is written before the index entry. A crash in between leaves a
//! value without an index entry; a failed index removal leaves a dangling
//! entry. `list_keys` tolerates both.
//!
//! The agent id's length prefix keeps ids containing `:` from colliding, and
//! each scope records its own key, which `load` checks.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::AppError;
use crate::optimization::kv::KeyValueBackend;
use crate::optimization::scope::{LoopScope, ScopeKey};

pub const DEFAULT_NAMESPACE: &str = "optimizer:scope";

pub struct ScopeStore {
    backend: Arc<dyn KeyValueBackend>,
    namespace: String,
}

impl ScopeStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<dyn KeyValueBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn value_key(&self, key: &ScopeKey) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace,
            key.agent_id.len(),
            key.agent_id,
            key.conversation_id
        )
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    /// Persists `scope` under `key`. Returns `false` without writing when
    /// either id is blank or serialization fails; backend failures propagate.
    pub async fn save(&self, key: &ScopeKey, scope: &LoopScope) -> Result<bool, AppError> {
        if !key.is_valid() {
            warn!("Refusing to save scope with blank agent or conversation id");
            return Ok(false);
        }
        if scope.key != *key {
            warn!("Refusing to save scope for {} under {key}", scope.key);
            return Ok(false);
        }

        let (value, member) = match (serde_json::to_string(scope), serde_json::to_string(key)) {
            (Ok(value), Ok(member)) => (value, member),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to serialize scope {key}: {e}");
                return Ok(false);
            }
        };

        self.backend.set(&self.value_key(key), &value).await?;
        self.backend.set_add(&self.index_key(), &member).await?;
        debug!("Saved scope {key} (iteration {})", scope.iteration);
        Ok(true)
    }

    /// Loads the scope for `key`. Blank ids, a missing or undecodable value,
    /// and a value recorded for a different key all yield `None`.
    pub async fn load(&self, key: &ScopeKey) -> Result<Option<LoopScope>, AppError> {
        if !key.is_valid() {
            return Ok(None);
        }

        let Some(raw) = self.backend.get(&self.value_key(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<LoopScope>(&raw) {
            Ok(scope) if scope.key == *key => Ok(Some(scope)),
            Ok(scope) => {
                warn!("Stored scope under {key} belongs to {}", scope.key);
                Ok(None)
            }
            Err(e) => {
                warn!("Stored scope {key} could not be decoded: {e}");
                Ok(None)
            }
        }
    }

    /// Removes the scope. Idempotent: deleting a missing scope succeeds.
    /// Index cleanup is best-effort and only logged on failure.
    pub async fn delete(&self, key: &ScopeKey) -> Result<bool, AppError> {
        if !key.is_valid() {
            return Ok(false);
        }

        let removed = self.backend.delete(&self.value_key(key)).await?;
        if !removed {
            debug!("Scope {key} was already absent");
        }

        match serde_json::to_string(key) {
            Ok(member) => {
                if let Err(e) = self.backend.set_remove(&self.index_key(), &member).await {
                    warn!("Failed to remove scope {key} from index: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize scope key {key}: {e}"),
        }

        Ok(true)
    }

    /// Every key in the index that decodes to a valid key. Corrupt entries
    /// are skipped.
    pub async fn list_keys(&self) -> Result<HashSet<ScopeKey>, AppError> {
        let members = self.backend.set_members(&self.index_key()).await?;
        Ok(members
            .iter()
            .filter_map(|m| serde_json::from_str::<ScopeKey>(m).ok())
            .filter(ScopeKey::is_valid)
            .collect())
    }
}
