//! Iterative profile refinement: a reviewer scores the profile against a job
//! description, a tailor revises it, and the loop state is persisted after
//! every iteration.

pub mod agents;
pub mod kv;
pub mod memory;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod scope;
pub mod scope_store;

pub use agents::{LlmReviewer, LlmTailor, Reviewer, Tailor};
pub use kv::{InMemoryKeyValueBackend, KeyValueBackend, RedisKeyValueBackend};
pub use memory::ConversationMemory;
pub use progress::{ChannelProgressSink, ProgressEvent, ProgressSink, RedisProgressSink};
pub use runner::{LoopOutcome, LoopSettings, OptimizationLoop};
pub use scope::{LoopScope, LoopStatus, ReviewVerdict, ScopeKey};
pub use scope_store::ScopeStore;
