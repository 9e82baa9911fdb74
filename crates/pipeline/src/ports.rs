//! Collaborator port traits.
//!
//! The orchestration layer depends only on these traits. Infrastructure crates
//! provide implementations:
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`LlmProvider`] | `llm::OpenAiCompatibleProvider` |
//! | [`WebSearch`], [`ImageSource`] | `search::SerperClient` |
//! | [`DocumentRenderer`] | `render::HtmlRenderer`, `render::CommandRenderer` |
//! | [`OutlineGenerator`], [`Researcher`], [`SectionWriter`] | `nodes::collaborators` (LLM-backed) |
//!
//! Implementations make exactly one external call per method invocation and
//! never retry internally; retries are owned by the executor so that every
//! attempt passes through the rate limiter again.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CollaboratorError, SectionTitle};

// ---------------------------------------------------------------------------
// Content collaborators
// ---------------------------------------------------------------------------

/// Produces the raw Markdown outline for a topic.
#[async_trait]
pub trait OutlineGenerator: Send + Sync {
    /// Returns outline text containing `## ` section headings.
    async fn generate_outline(&self, topic: &str) -> Result<String, CollaboratorError>;
}

/// Input to one research step.
#[derive(Debug, Clone)]
pub struct ResearchRequest<'a> {
    /// Document topic.
    pub topic: &'a str,
    /// Section being researched.
    pub section: &'a SectionTitle,
    /// Zero-based step index within this section's research.
    pub step: u32,
    /// Notes accumulated by earlier steps.
    pub notes: &'a str,
}

/// Result of one research step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchProgress {
    /// More material; appended to the notes. Research may continue.
    Partial(String),
    /// Final research text; replaces the notes and ends research.
    Complete(String),
}

/// Gathers material for a single section, one external call per step.
#[async_trait]
pub trait Researcher: Send + Sync {
    /// Performs research step `request.step`.
    async fn research_step(
        &self,
        request: &ResearchRequest<'_>,
    ) -> Result<ResearchProgress, CollaboratorError>;
}

/// Input to the write step.
#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    /// Document topic.
    pub topic: &'a str,
    /// Section to write.
    pub section: &'a SectionTitle,
    /// Research gathered for this section.
    pub research: &'a str,
}

/// Produces the Markdown prose of one section.
#[async_trait]
pub trait SectionWriter: Send + Sync {
    /// Returns the section text, ideally starting with its `## ` heading.
    async fn write(&self, request: &WriteRequest<'_>) -> Result<String, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// A single-turn chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt (role/backstory).
    pub system: String,
    /// User prompt (the task).
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_tokens: Option<u32>,
}

/// Text returned by a language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated content.
    pub content: String,
    /// Model that produced it, as reported by the provider.
    pub model: String,
}

/// A chat-completion language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Runs one completion. Empty content is reported as
    /// [`CollaboratorError::EmptyResponse`].
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// One organic web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub link: String,
    /// Text excerpt.
    pub snippet: String,
}

/// Web search.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Returns organic results for `query`, best first.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError>;
}

/// A candidate cover image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCandidate {
    /// Direct image URL.
    pub url: String,
    /// Title or alt text, if provided.
    pub title: Option<String>,
}

/// Finds and downloads illustrative images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Returns candidate images for `topic`, best first.
    async fn find_candidates(&self, topic: &str) -> Result<Vec<ImageCandidate>, CollaboratorError>;

    /// Downloads `candidate` to `dest_stem` plus an extension chosen by the
    /// implementation. Returns the written path.
    async fn fetch(
        &self,
        candidate: &ImageCandidate,
        dest_stem: &Path,
    ) -> Result<PathBuf, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Input to the renderer.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    /// Full document Markdown (the buffer content).
    pub markdown: &'a str,
    /// Cover image, if one was resolved.
    pub cover: Option<&'a Path>,
    /// Where the artifact should be written.
    pub destination: &'a Path,
}

/// Turns the assembled Markdown into the final paginated artifact.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// File extension of produced artifacts, without the dot (e.g. `"pdf"`).
    fn artifact_extension(&self) -> &str;

    /// Renders the document and returns the path actually written.
    async fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf, CollaboratorError>;
}
