use thiserror::Error;

use crate::llm_client::LlmError;

/// Failure of an external model capability (text generation or embedding).
///
/// Callers decide the policy: rerank and query expansion degrade on it,
/// review and tailoring propagate it.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Generation provider error: {0}")]
    Generation(#[from] LlmError),

    #[error("Embedding provider error: {0}")]
    Embedding(String),
}

/// Application-level error type shared by the stores, retrieval and the
/// optimization loop.
#[derive(Debug, Error)]
pub enum AppError {
    /// The vector store or the scope store backing service is unreachable or
    /// rejected the request.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Provider(ProviderError::Generation(e))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::StoreUnavailable(format!("redis: {e}"))
    }
}

impl AppError {
    /// Short, stable name of the failed dependency, used in logs and job
    /// failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Provider(ProviderError::Generation(_)) => "GENERATION_PROVIDER_ERROR",
            AppError::Provider(ProviderError::Embedding(_)) => "EMBEDDING_PROVIDER_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_converts_to_generation_provider_error() {
        let err: AppError = LlmError::EmptyContent.into();
        assert_eq!(err.kind(), "GENERATION_PROVIDER_ERROR");
        assert!(err.to_string().contains("empty content"));
    }

    #[test]
    fn test_store_unavailable_kind() {
        let err = AppError::StoreUnavailable("connection refused".to_string());
        assert_eq!(err.kind(), "STORE_UNAVAILABLE");
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }
}
