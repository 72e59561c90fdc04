//! Timeout + single-retry wrapper around a provider.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Hard cap: never more than one retry per call.
const MAX_RETRIES_CAP: u32 = 1;

/// Backoff before the single retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Reasoning client used by every pipeline stage.
///
/// Holds an optional provider: `None` means the service is running degraded
/// and every call fails fast with `LlmError::Unavailable`.
#[derive(Clone)]
pub struct ReasoningClient {
    provider: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
    max_retries: u32,
}

impl ReasoningClient {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            provider,
            timeout,
            max_retries: max_retries.min(MAX_RETRIES_CAP),
        }
    }

    /// A client with no backend.
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(1), 0)
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.model_name())
    }

    /// Complete with a per-attempt timeout and at most one retry on transient errors.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let provider = self.provider.as_ref().ok_or(LlmError::Unavailable)?;

        let mut attempt = 0;
        loop {
            let result =
                match tokio::time::timeout(self.timeout, provider.complete(request.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout {
                        provider: provider.model_name().to_string(),
                        timeout: self.timeout,
                    }),
                };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Reasoning call failed, retrying once");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) => {
                    debug!(error = %e, attempt, "Reasoning call failed");
                    return Err(e);
                }
            }
        }
    }
}
