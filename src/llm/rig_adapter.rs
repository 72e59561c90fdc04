//! Bridges rig-core agents to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1024;

enum RigClient {
    Anthropic(rig::client::Client<anthropic::client::AnthropicExt>),
    OpenAi(rig::client::Client<openai::client::OpenAIResponsesExt>),
}

/// `LlmProvider` backed by a rig-core client.
///
/// A fresh agent is built per request so the preamble can carry the
/// stage-specific system prompt.
pub struct RigAdapter {
    client: RigClient,
    model: String,
}

impl RigAdapter {
    pub fn anthropic(
        client: rig::client::Client<anthropic::client::AnthropicExt>,
        model: &str,
    ) -> Self {
        Self {
            client: RigClient::Anthropic(client),
            model: model.to_string(),
        }
    }

    pub fn openai(
        client: rig::client::Client<openai::client::OpenAIResponsesExt>,
        model: &str,
    ) -> Self {
        Self {
            client: RigClient::OpenAi(client),
            model: model.to_string(),
        }
    }

    fn provider(&self) -> &'static str {
        match self.client {
            RigClient::Anthropic(_) => "anthropic",
            RigClient::OpenAi(_) => "openai",
        }
    }
}

#[async_trait]
impl LlmProvider for RigAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_prompt();
        let prompt = request.user_prompt();
        let temperature = f64::from(request.temperature.unwrap_or(DEFAULT_TEMPERATURE));
        let max_tokens = u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));

        let result = match &self.client {
            RigClient::Anthropic(client) => {
                client
                    .agent(&self.model)
                    .preamble(&preamble)
                    .temperature(temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
            RigClient::OpenAi(client) => {
                client
                    .agent(&self.model)
                    .preamble(&preamble)
                    .temperature(temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
        };

        match result {
            Ok(content) => Ok(CompletionResponse { content }),
            Err(e) => Err(classify_error(self.provider(), &e.to_string())),
        }
    }
}

/// Map a rig error message onto our taxonomy so the retry layer can decide.
fn classify_error(provider: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("overloaded") {
        LlmError::RateLimited {
            provider: provider.to_string(),
        }
    } else if lower.contains("401") || lower.contains("authentication") || lower.contains("api key")
    {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: message.to_string(),
        }
    }
}
