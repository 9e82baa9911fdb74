//! Scriptorium LLM provider infrastructure adapter.
//!
//! Implements the [`pipeline::LlmProvider`] trait for any server exposing the
//! OpenAI `/chat/completions` API: OpenAI itself, LM Studio, Ollama, vLLM or
//! the Gemini compatibility endpoint.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and HTTP status classification live here. The [`pipeline`] crate sees only
//! [`pipeline::LlmProvider`] and [`pipeline::CollaboratorError`].
//!
//! The provider never retries. A retryable failure carries its
//! `Retry-After` hint in the error so the executor can retry through the rate
//! limiter.

mod openai_compatible;

pub use openai_compatible::{
    choose_model, normalize_base_url, LlmConfig, ModelChoice, OpenAiCompatibleProvider,
    DEFAULT_BASE_URL, DEFAULT_MODEL,
};
