//! # kiln-agent
//!
//! The planner side of Kiln.
//!
//! The pipeline consumes planning and diagnosis through the [`Planner`] trait and
//! never depends on how answers are produced. [`AgentPlanner`] is the production
//! implementation: it prompts an Anthropic model for XML blocks and parses them
//! into change-sets and fixes.
//!
//! Each call is a fresh, stateless request. No conversation history is kept.

mod auth;
mod circuit_breaker;
mod client;
mod parse;
mod planner;
mod prompt;
mod types;

pub use auth::get_auth_token;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::AgentClient;
pub use parse::{parse_change_set, parse_fix};
pub use planner::{AgentPlanner, Planner};
pub use prompt::{build_chat_prompt, build_fix_prompt, build_plan_prompt, fix_system_prompt};
pub use types::*;
