pub mod config;
pub mod embedding;
pub mod errors;
pub mod jobs;
pub mod llm_client;
pub mod models;
pub mod optimization;
pub mod retrieval;
pub mod state;
pub mod vector_store;
