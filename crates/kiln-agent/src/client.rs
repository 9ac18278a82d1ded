//! Anthropic API client
//!
//! Every call is a single stateless request; retries cover rate limits (429) and
//! server errors (5xx) with exponential backoff, and a process-wide circuit breaker
//! fails fast after repeated hard failures.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AgentResult, AnthropicMessage, AnthropicRequest, AnthropicResponse, Model};
use chrono::Utc;
use kiln_core::{KilnError, ModelConfig, Result};
use std::sync::OnceLock;
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 16000;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 120;

static CIRCUIT_BREAKER: OnceLock<CircuitBreaker> = OnceLock::new();

fn circuit_breaker() -> &'static CircuitBreaker {
    CIRCUIT_BREAKER.get_or_init(CircuitBreaker::default)
}

/// Client for the Anthropic messages API
#[derive(Debug, Clone)]
pub struct AgentClient {
    model: Model,
    max_tokens: usize,
    api_key_env: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Build a client from the `[models]` configuration section
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let model = config
            .default
            .parse::<Model>()
            .map_err(KilnError::Config)?;
        Ok(Self::new(model)
            .with_max_tokens(config.max_tokens)
            .with_api_key_env(config.api_key_env.clone()))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_api_key_env(mut self, env: impl Into<String>) -> Self {
        self.api_key_env = env.into();
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Send one prompt and return the first text block of the reply
    pub async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<AgentResult> {
        let breaker = circuit_breaker();
        if !breaker.can_execute() {
            return Err(KilnError::ApiLimit(format!(
                "Circuit breaker is open after repeated API failures; retry in {}s",
                breaker.retry_after().as_secs()
            )));
        }

        let auth_token = auth::get_auth_token(&self.api_key_env)?;

        let request = AnthropicRequest {
            model: self.model.api_name().to_string(),
            max_tokens: self.max_tokens,
            system: system.map(|s| s.to_string()),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!(
                "Sending request to Anthropic API (model {}, attempt {})",
                self.model,
                retries + 1
            );

            let response = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &auth_token)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| KilnError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(KilnError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                tracing::warn!(
                    "Rate limited (429). Waiting {}s before retry {}/{}",
                    wait_secs,
                    retries,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {}s before retry {}/{}",
                        status,
                        backoff_secs,
                        retries,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                breaker.record_failure();
                tracing::error!(
                    "Anthropic API error {} (breaker failures: {})",
                    status,
                    breaker.failure_count()
                );
                return Err(KilnError::Api(format!(
                    "Anthropic API error {}: {}",
                    status, error_text
                )));
            }

            let body: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| KilnError::Api(format!("Failed to parse response: {}", e)))?;

            let output = body
                .content
                .iter()
                .find(|block| block.content_type == "text")
                .map(|block| block.text.clone())
                .ok_or_else(|| KilnError::Api("No text content in response".to_string()))?;

            breaker.record_success();

            match &body.usage {
                Some(usage) => tracing::info!(
                    "Model reply: {} chars ({} in / {} out tokens)",
                    output.len(),
                    usage.input_tokens,
                    usage.output_tokens
                ),
                None => tracing::info!("Model reply: {} chars", output.len()),
            }

            return Ok(AgentResult {
                output,
                timestamp: Utc::now(),
                usage: body.usage,
            });
        }
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new(Model::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = AgentClient::new(Model::Opus)
            .with_max_tokens(8000)
            .with_api_key_env("MY_KEY");
        assert_eq!(client.model, Model::Opus);
        assert_eq!(client.max_tokens, 8000);
        assert_eq!(client.api_key_env, "MY_KEY");
    }

    #[test]
    fn test_from_config() {
        let config = ModelConfig {
            default: "haiku".to_string(),
            api_key_env: "KILN_KEY".to_string(),
            max_tokens: 2048,
        };
        let client = AgentClient::from_config(&config).unwrap();
        assert_eq!(client.model(), Model::Haiku);
        assert_eq!(client.max_tokens, 2048);

        let bad = ModelConfig {
            default: "gpt-4".to_string(),
            ..config
        };
        assert!(matches!(
            AgentClient::from_config(&bad),
            Err(KilnError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_without_auth_fails() {
        let client = AgentClient::default().with_api_key_env("KILN_UNSET_KEY_FOR_TEST");
        if std::env::var("CLAUDE_CODE_OAUTH_TOKEN").is_ok() {
            return;
        }
        assert!(client.complete(None, "hello").await.is_err());
    }
}
