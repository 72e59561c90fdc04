//! Error types for the negotiation reply service.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
///
/// A missing backend credential is not fatal: the service starts degraded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Reasoning backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("No reasoning backend configured")]
    Unavailable,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a single retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Malformed requests. Rejected, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A candidate reply broke a hard constraint.
#[derive(Debug, thiserror::Error)]
pub enum PolicyViolation {
    #[error("Candidate {pattern} mentions avoided topic '{topic}'")]
    AvoidedTopic { pattern: String, topic: String },

    #[error("All {dropped} candidates violated avoid-topic constraints")]
    AllCandidatesDropped { dropped: usize },
}

/// Approval decision errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No approval decision for thread {thread_id}")]
    NotFound { thread_id: String },

    #[error("Decision {id} is not pending (current: {current})")]
    NotPending { id: Uuid, current: String },
}

/// Orchestration pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No candidates produced")]
    NoCandidates,

    #[error("Pipeline exhausted: {0}")]
    Exhausted(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
