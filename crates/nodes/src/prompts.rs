//! Prompt text for the LLM-backed collaborators.

use pipeline::{CompletionRequest, SearchHit, SectionTitle};

/// Organic results kept when turning a web search into research notes.
pub const SEARCH_HITS_KEPT: usize = 5;

const OUTLINE_TEMPERATURE: f32 = 0.7;
const RESEARCH_TEMPERATURE: f32 = 0.3;
const WRITE_TEMPERATURE: f32 = 0.7;
const WRITE_MAX_TOKENS: u32 = 2048;

/// English name of an ISO 639-1 code, for use inside prompts.
pub fn language_name(code: &str) -> &str {
    match code.trim().to_ascii_lowercase().as_str() {
        "es" => "Spanish",
        "en" => "English",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ca" => "Catalan",
        _ => code,
    }
}

pub fn outline(topic: &str, language: &str) -> CompletionRequest {
    let language = language_name(language);
    CompletionRequest {
        system: "You are a technical document architect with long experience structuring \
                 academic, scientific and engineering documents. You produce clear, logical \
                 outlines that make complex subjects easy to follow."
            .to_string(),
        prompt: format!(
            "Create the outline of a technical document of 8 to 12 pages about: {topic}\n\n\
             Requirements:\n\
             - Markdown only. Start with a single `# ` line holding the document title.\n\
             - Between 6 and 8 main sections, each a `## ` heading.\n\
             - Use `### ` subsections only where they help.\n\
             - Begin with an introduction and end with conclusions.\n\
             - Titles must be specific to the topic, not generic placeholders.\n\
             - Balance theory with practice: include applications or examples.\n\
             - Do not add a references or bibliography section.\n\
             - Write every title in {language}.\n\n\
             Return only the outline."
        ),
        temperature: OUTLINE_TEMPERATURE,
        max_tokens: None,
    }
}

fn research_system() -> String {
    "You are a technical researcher. You extract the facts that matter and state them \
     precisely, with figures and concrete examples where available."
        .to_string()
}

const KEY_POINTS_FORMAT: &str = "Answer with 3 to 5 bullet points (`- `), each one a specific \
     fact, figure or example. Roughly 50 to 150 words in total. No introduction or closing.";

/// Research from the model's own knowledge, used when there are no search notes.
pub fn research_direct(section: &SectionTitle, topic: &str, language: &str) -> CompletionRequest {
    let language = language_name(language);
    CompletionRequest {
        system: research_system(),
        prompt: format!(
            "Gather the key points for the section \"{section}\" of a document about {topic}.\n\n\
             {KEY_POINTS_FORMAT}\nWrite in {language}."
        ),
        temperature: RESEARCH_TEMPERATURE,
        max_tokens: None,
    }
}

/// Condense raw notes (typically search results) into key points.
pub fn research_condense(
    section: &SectionTitle,
    topic: &str,
    notes: &str,
    language: &str,
) -> CompletionRequest {
    let language = language_name(language);
    CompletionRequest {
        system: research_system(),
        prompt: format!(
            "Below are raw notes found while researching the section \"{section}\" of a \
             document about {topic}.\n\n---\n{notes}\n---\n\n\
             Using only what is relevant in these notes, {KEY_POINTS_FORMAT}\n\
             Write in {language}."
        ),
        temperature: RESEARCH_TEMPERATURE,
        max_tokens: None,
    }
}

pub fn write_section(
    section: &SectionTitle,
    topic: &str,
    research: &str,
    language: &str,
) -> CompletionRequest {
    let language = language_name(language);
    CompletionRequest {
        system: format!(
            "You are a senior technical writer. You write professional, well-developed \
             technical prose in {language}, with correct spelling and accents."
        ),
        prompt: format!(
            "Write the section \"{section}\" of a technical document about {topic}.\n\n\
             Research notes for this section:\n---\n{research}\n---\n\n\
             Requirements:\n\
             - Start with the heading line `## {section}` followed by a blank line.\n\
             - At least 200 words of substantive content; 400 to 600 words preferred.\n\
             - Develop each point with technical detail and concrete examples.\n\
             - Markdown body text; `### ` subsections, lists and tables are allowed.\n\
             - Write entirely in {language}.\n\n\
             Return only the section."
        ),
        temperature: WRITE_TEMPERATURE,
        max_tokens: Some(WRITE_MAX_TOKENS),
    }
}

/// Formats search hits as plain-text research notes.
pub fn search_notes(section: &SectionTitle, hits: &[SearchHit]) -> String {
    let mut notes = format!("Search results for \"{section}\":\n");
    for (i, hit) in hits.iter().take(SEARCH_HITS_KEPT).enumerate() {
        notes.push_str(&format!(
            "\n{}. {}\n   {}\n   Source: {}\n",
            i + 1,
            hit.title.trim(),
            hit.snippet.trim(),
            hit.link
        ));
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(s: &str) -> SectionTitle {
        SectionTitle::new(s).unwrap()
    }

    #[test]
    fn language_codes_map_to_names() {
        assert_eq!(language_name("es"), "Spanish");
        assert_eq!(language_name(" EN "), "English");
        assert_eq!(language_name("eu"), "eu");
    }

    #[test]
    fn write_prompt_names_heading_and_language() {
        let request = write_section(&title("Historia"), "Robótica", "- dato", "es");
        assert!(request.prompt.contains("## Historia"));
        assert!(request.prompt.contains("Robótica"));
        assert!(request.prompt.contains("- dato"));
        assert!(request.system.contains("Spanish"));
        assert_eq!(request.max_tokens, Some(WRITE_MAX_TOKENS));
    }

    #[test]
    fn outline_prompt_asks_for_level_two_sections() {
        let request = outline("Computación cuántica", "en");
        assert!(request.prompt.contains("## "));
        assert!(request.prompt.contains("Computación cuántica"));
        assert!(request.prompt.contains("English"));
    }

    #[test]
    fn search_notes_keep_top_hits() {
        let hits: Vec<SearchHit> = (0..8)
            .map(|i| SearchHit {
                title: format!("Result {i}"),
                link: format!("https://example.org/{i}"),
                snippet: format!("snippet {i}"),
            })
            .collect();
        let notes = search_notes(&title("Intro"), &hits);
        assert!(notes.contains("Result 4"));
        assert!(!notes.contains("Result 5"));
        assert!(notes.contains("Source: https://example.org/0"));
    }
}
