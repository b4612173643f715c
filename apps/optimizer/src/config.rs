use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Worker configuration loaded from environment variables.
/// Startup fails if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub vector_collection: String,
    pub redis_url: String,
    pub anthropic_api_key: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub hyde_temperature: f32,
    pub embedding_api_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_timeout: Duration,
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    pub memory_window: usize,
    pub rerank_concurrency: usize,
    pub progress_channel: String,
    pub job_queue: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let embedding_dimension: usize = env.parse_or("EMBEDDING_DIMENSION", 1536)?;
        if embedding_dimension == 0 {
            anyhow::bail!("EMBEDDING_DIMENSION must be greater than zero");
        }

        let convergence_threshold: f64 = env.parse_or("CONVERGENCE_THRESHOLD", 0.8)?;
        if !(0.0..=1.0).contains(&convergence_threshold) {
            anyhow::bail!("CONVERGENCE_THRESHOLD must be between 0 and 1");
        }

        Ok(Config {
            qdrant_url: env.require("QDRANT_URL")?,
            qdrant_api_key: env.optional("QDRANT_API_KEY"),
            vector_collection: env.or("VECTOR_COLLECTION", "profiles"),
            redis_url: env.require("REDIS_URL")?,
            anthropic_api_key: env.require("ANTHROPIC_API_KEY")?,
            llm_model: env.or("LLM_MODEL", crate::llm_client::DEFAULT_MODEL),
            llm_timeout: Duration::from_secs(env.parse_or("LLM_TIMEOUT_SECS", 120)?),
            hyde_temperature: env.parse_or("HYDE_TEMPERATURE", 0.7)?,
            embedding_api_url: env.require("EMBEDDING_API_URL")?,
            embedding_api_key: env.optional("EMBEDDING_API_KEY"),
            embedding_model: env.or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension,
            embedding_timeout: Duration::from_secs(env.parse_or("EMBEDDING_TIMEOUT_SECS", 30)?),
            max_iterations: env.parse_or("MAX_ITERATIONS", 3)?,
            convergence_threshold,
            memory_window: env.parse_or("MEMORY_WINDOW", 10)?,
            rerank_concurrency: env.parse_or("RERANK_CONCURRENCY", 4)?,
            progress_channel: env.or("PROGRESS_CHANNEL", "optimizer:progress"),
            job_queue: env.or("JOB_QUEUE", "optimizer:jobs"),
            rust_log: env.or("RUST_LOG", "info"),
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value '{raw}'")),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("QDRANT_URL", "http://localhost:6334"),
        ("REDIS_URL", "redis://localhost:6379"),
        ("ANTHROPIC_API_KEY", "sk-test"),
        ("EMBEDDING_API_URL", "http://localhost:8000/v1"),
    ];

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.vector_collection, "profiles");
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.llm_model, "claude-sonnet-4-5");
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.embedding_timeout, Duration::from_secs(30));
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.convergence_threshold, 0.8);
        assert_eq!(config.memory_window, 10);
        assert_eq!(config.rerank_concurrency, 4);
        assert_eq!(config.progress_channel, "optimizer:progress");
        assert_eq!(config.job_queue, "optimizer:jobs");
        assert!(config.qdrant_api_key.is_none());
        assert!(config.embedding_api_key.is_none());
    }

    #[test]
    fn test_missing_required_variable_is_named() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("QDRANT_URL"));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("EMBEDDING_DIMENSION", "768"),
            ("MAX_ITERATIONS", "5"),
            ("HYDE_TEMPERATURE", "0.9"),
            ("QDRANT_API_KEY", "qk"),
            ("EMBEDDING_API_KEY", "  "),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.hyde_temperature, 0.9);
        assert_eq!(config.qdrant_api_key.as_deref(), Some("qk"));
        assert!(config.embedding_api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("MAX_ITERATIONS", "three"),
            ("EMBEDDING_DIMENSION", "0"),
            ("CONVERGENCE_THRESHOLD", "1.5"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }
}
