//! Authentication for the Anthropic API
//!
//! Priority:
//! 1. `CLAUDE_CODE_OAUTH_TOKEN` (subscription access)
//! 2. The configured API key variable (`ANTHROPIC_API_KEY` by default)

use kiln_core::{KilnError, Result};
use std::env;

const OAUTH_TOKEN_ENV: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Get the authentication token, reading the API key from `api_key_env`
pub fn get_auth_token(api_key_env: &str) -> Result<String> {
    if let Ok(token) = env::var(OAUTH_TOKEN_ENV) {
        if !token.trim().is_empty() {
            tracing::debug!("Using {}", OAUTH_TOKEN_ENV);
            return Ok(token);
        }
    }

    match env::var(api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using {}", api_key_env);
            Ok(key)
        }
        _ => Err(KilnError::Auth(format!(
            "No authentication found. Set {} or {}",
            OAUTH_TOKEN_ENV, api_key_env
        ))),
    }
}
