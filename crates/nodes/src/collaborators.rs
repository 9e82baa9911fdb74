//! Content collaborators backed by a language model.
//!
//! Each port method makes exactly one external call (one completion or one
//! search), so the gateway's rate limiting sees every request.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    CollaboratorError, LlmProvider, OutlineGenerator, ResearchProgress, ResearchRequest,
    Researcher, SectionWriter, WebSearch, WriteRequest,
};

use crate::prompts;

pub struct LlmOutlineGenerator {
    llm: Arc<dyn LlmProvider>,
    language: String,
}

impl LlmOutlineGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, language: impl Into<String>) -> Self {
        Self {
            llm,
            language: language.into(),
        }
    }
}

#[async_trait]
impl OutlineGenerator for LlmOutlineGenerator {
    async fn generate_outline(&self, topic: &str) -> Result<String, CollaboratorError> {
        let completion = self.llm.complete(&prompts::outline(topic, &self.language)).await?;
        Ok(strip_code_fence(&completion.content))
    }
}

/// Step 0 searches the web when a [`WebSearch`] is configured and returns the
/// hits as partial notes; without search it answers from the model directly.
/// A failed or empty search yields empty notes, so the next step researches
/// directly. Later steps condense the notes into key points.
pub struct LlmResearcher {
    llm: Arc<dyn LlmProvider>,
    search: Option<Arc<dyn WebSearch>>,
    language: String,
}

impl LlmResearcher {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Option<Arc<dyn WebSearch>>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            search,
            language: language.into(),
        }
    }
}

#[async_trait]
impl Researcher for LlmResearcher {
    async fn research_step(
        &self,
        request: &ResearchRequest<'_>,
    ) -> Result<ResearchProgress, CollaboratorError> {
        match (request.step, &self.search) {
            (0, Some(search)) => {
                let query = format!("{} {}", request.section, request.topic);
                let hits = match search.search(&query).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(query = %query, error = %e, "Web search failed; researching without it");
                        return Ok(ResearchProgress::Partial(String::new()));
                    }
                };
                tracing::debug!(query = %query, hits = hits.len(), "Web search finished");
                if hits.is_empty() {
                    return Ok(ResearchProgress::Partial(String::new()));
                }
                Ok(ResearchProgress::Partial(prompts::search_notes(
                    request.section,
                    &hits,
                )))
            }
            (_, _) if request.notes.trim().is_empty() => {
                let prompt =
                    prompts::research_direct(request.section, request.topic, &self.language);
                let completion = self.llm.complete(&prompt).await?;
                Ok(ResearchProgress::Complete(completion.content))
            }
            (_, _) => {
                let prompt = prompts::research_condense(
                    request.section,
                    request.topic,
                    request.notes,
                    &self.language,
                );
                let completion = self.llm.complete(&prompt).await?;
                Ok(ResearchProgress::Complete(completion.content))
            }
        }
    }
}

pub struct LlmSectionWriter {
    llm: Arc<dyn LlmProvider>,
    language: String,
}

impl LlmSectionWriter {
    pub fn new(llm: Arc<dyn LlmProvider>, language: impl Into<String>) -> Self {
        Self {
            llm,
            language: language.into(),
        }
    }
}

#[async_trait]
impl SectionWriter for LlmSectionWriter {
    async fn write(&self, request: &WriteRequest<'_>) -> Result<String, CollaboratorError> {
        let prompt = prompts::write_section(
            request.section,
            request.topic,
            request.research,
            &self.language,
        );
        Ok(strip_code_fence(&self.llm.complete(&prompt).await?.content))
    }
}

/// Removes one fence wrapping the whole reply (```` ```markdown ... ``` ````).
/// Replies that are not entirely fenced are returned as they are.
fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply.to_string();
    };
    let Some((info, body)) = rest.split_once('\n') else {
        return reply.to_string();
    };
    if info.contains('`') {
        return reply.to_string();
    }
    match body.trim_end().strip_suffix("```") {
        Some(inner) if !inner.contains("\n```") => inner.trim().to_string(),
        _ => reply.to_string(),
    }
}
