//! Research → write chain for one section.
//!
//! The write step never starts before research has finished, and a section
//! reaches the buffer through exactly one append or not at all.

use std::sync::Arc;

use pipeline::{
    BufferStats, ResearchProgress, ResearchRequest, Researcher, SectionError, SectionFailure,
    SectionStep, SectionTitle, SectionWriter, WriteRequest,
};

use crate::{DocumentBuffer, Gateway, PipelineSettings};

/// Result of a successfully written section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionReport {
    /// Words and lines the section added.
    pub added: BufferStats,
    /// Whole-buffer counts after the append.
    pub total: BufferStats,
    /// Research calls made.
    pub research_calls: u32,
}

pub struct SectionProcessor {
    gateway: Gateway,
    researcher: Arc<dyn Researcher>,
    writer: Arc<dyn SectionWriter>,
    research_max_calls: u32,
    min_research_chars: usize,
    min_section_words: usize,
}

impl SectionProcessor {
    pub fn new(
        gateway: Gateway,
        researcher: Arc<dyn Researcher>,
        writer: Arc<dyn SectionWriter>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            gateway,
            researcher,
            writer,
            research_max_calls: settings.research_max_calls.max(1),
            min_research_chars: settings.min_research_chars,
            min_section_words: settings.min_section_words,
        }
    }

    /// Researches and writes `section`, appending it to `buffer` on success.
    pub async fn process(
        &self,
        topic: &str,
        section: &SectionTitle,
        buffer: &mut DocumentBuffer,
    ) -> Result<SectionReport, SectionError> {
        let (research, research_calls) = self.research(topic, section).await?;
        tracing::debug!(
            research_calls,
            research_chars = research.chars().count(),
            "Research complete"
        );

        let written = self
            .gateway
            .call(
                "write",
                self.writer.write(&WriteRequest {
                    topic,
                    section,
                    research: &research,
                }),
            )
            .await
            .map_err(|e| SectionError::new(section.clone(), SectionStep::Write, e))?;

        let text = with_heading(&written, section);
        let words = body_words(&text);
        if words < self.min_section_words {
            return Err(SectionError::new(
                section.clone(),
                SectionStep::Write,
                SectionFailure::TooShort {
                    words,
                    floor: self.min_section_words,
                },
            ));
        }

        let report = buffer
            .append(&text)
            .await
            .map_err(|e| SectionError::new(section.clone(), SectionStep::Write, e))?;
        Ok(SectionReport {
            added: report.added,
            total: report.total,
            research_calls,
        })
    }

    async fn research(
        &self,
        topic: &str,
        section: &SectionTitle,
    ) -> Result<(String, u32), SectionError> {
        let mut notes = String::new();
        let mut calls = 0;
        while calls < self.research_max_calls {
            let request = ResearchRequest {
                topic,
                section,
                step: calls,
                notes: &notes,
            };
            let progress = self
                .gateway
                .call("research", self.researcher.research_step(&request))
                .await
                .map_err(|e| SectionError::new(section.clone(), SectionStep::Research, e))?;
            calls += 1;
            match progress {
                ResearchProgress::Partial(more) => {
                    let more = more.trim();
                    if !more.is_empty() {
                        if !notes.is_empty() {
                            notes.push_str("\n\n");
                        }
                        notes.push_str(more);
                    }
                }
                ResearchProgress::Complete(done) => {
                    notes = done.trim().to_string();
                    break;
                }
            }
        }

        let chars = notes.chars().count();
        if chars < self.min_research_chars {
            return Err(SectionError::new(
                section.clone(),
                SectionStep::Research,
                SectionFailure::InsufficientResearch {
                    chars,
                    floor: self.min_research_chars,
                },
            ));
        }
        Ok((notes, calls))
    }
}

/// Prepends `## {section}` unless the text already opens with a level-2 heading.
fn with_heading(text: &str, section: &SectionTitle) -> String {
    let opens_with_heading = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.trim_start().starts_with("## "));
    if opens_with_heading {
        text.to_string()
    } else {
        format!("## {section}\n\n{}", text.trim_start())
    }
}

/// Words after the opening heading line.
fn body_words(text: &str) -> usize {
    let mut lines = text.lines().skip_while(|line| line.trim().is_empty());
    lines.next();
    lines.map(|line| line.split_whitespace().count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline::CollaboratorError;
    use std::num::NonZeroU32;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    use crate::RateLimiter;

    struct ScriptedResearcher {
        steps: Mutex<Vec<Result<ResearchProgress, CollaboratorError>>>,
        seen_notes: Mutex<Vec<String>>,
    }

    impl ScriptedResearcher {
        fn new(steps: Vec<Result<ResearchProgress, CollaboratorError>>) -> Self {
            Self {
                steps: Mutex::new(steps),
                seen_notes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Researcher for ScriptedResearcher {
        async fn research_step(
            &self,
            request: &ResearchRequest<'_>,
        ) -> Result<ResearchProgress, CollaboratorError> {
            self.seen_notes.lock().unwrap().push(request.notes.to_string());
            let mut steps = self.steps.lock().unwrap();
            if steps.is_empty() {
                Ok(ResearchProgress::Partial(String::new()))
            } else {
                steps.remove(0)
            }
        }
    }

    struct FixedWriter {
        output: Result<String, CollaboratorError>,
        seen_research: Mutex<Option<String>>,
    }

    impl FixedWriter {
        fn new(output: Result<String, CollaboratorError>) -> Self {
            Self {
                output,
                seen_research: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SectionWriter for FixedWriter {
        async fn write(&self, request: &WriteRequest<'_>) -> Result<String, CollaboratorError> {
            *self.seen_research.lock().unwrap() = Some(request.research.to_string());
            self.output.clone()
        }
    }

    fn words(n: usize) -> String {
        vec!["palabra"; n].join(" ")
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            min_section_words: 20,
            min_research_chars: 10,
            ..PipelineSettings::default()
        }
    }

    fn processor(
        researcher: Arc<ScriptedResearcher>,
        writer: Arc<FixedWriter>,
        limiter: Arc<RateLimiter>,
    ) -> SectionProcessor {
        let gateway = Gateway::new(limiter, Duration::from_secs(30));
        SectionProcessor::new(gateway, researcher, writer, &settings())
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::per_minute(NonZeroU32::new(100).unwrap()))
    }

    fn title(s: &str) -> SectionTitle {
        SectionTitle::new(s).unwrap()
    }

    #[tokio::test]
    async fn research_then_write_appends_once() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![
            Ok(ResearchProgress::Partial("hallazgo uno sobre el tema".into())),
            Ok(ResearchProgress::Partial("hallazgo dos".into())),
        ]));
        let writer = Arc::new(FixedWriter::new(Ok(format!("## Historia\n\n{}", words(25)))));
        let limiter = limiter();
        let processor = processor(researcher.clone(), writer.clone(), limiter.clone());

        let report = processor.process("T", &title("Historia"), &mut buffer).await.unwrap();

        assert_eq!(report.research_calls, 2);
        assert_eq!(report.added.words, 27);
        assert_eq!(
            writer.seen_research.lock().unwrap().as_deref(),
            Some("hallazgo uno sobre el tema\n\nhallazgo dos")
        );
        assert_eq!(
            researcher.seen_notes.lock().unwrap().as_slice(),
            ["", "hallazgo uno sobre el tema"]
        );
        // Two research calls and one write, all through the limiter.
        assert_eq!(limiter.in_window().await, 3);
        let content = buffer.read_all().await.unwrap();
        assert_eq!(content.matches("## Historia").count(), 1);
    }

    #[tokio::test]
    async fn complete_research_stops_early() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(ResearchProgress::Complete(
            "puntos clave completos".into(),
        ))]));
        let writer = Arc::new(FixedWriter::new(Ok(format!("## A\n{}", words(30)))));
        let processor = processor(researcher, writer, limiter());
        let report = processor.process("T", &title("A"), &mut buffer).await.unwrap();
        assert_eq!(report.research_calls, 1);
    }

    #[tokio::test]
    async fn missing_heading_is_prepended() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(ResearchProgress::Complete(
            "material suficiente".into(),
        ))]));
        let writer = Arc::new(FixedWriter::new(Ok(format!("\n\n{}", words(20)))));
        let processor = processor(researcher, writer, limiter());
        processor.process("T", &title("Contexto"), &mut buffer).await.unwrap();
        let content = buffer.read_all().await.unwrap();
        assert!(content.starts_with("# T\n\n## Contexto\n\npalabra"));
    }

    #[tokio::test]
    async fn short_write_fails_without_appending() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(ResearchProgress::Complete(
            "material suficiente".into(),
        ))]));
        let writer = Arc::new(FixedWriter::new(Ok(format!("## A\n{}", words(5)))));
        let processor = processor(researcher, writer, limiter());

        let err = processor.process("T", &title("A"), &mut buffer).await.unwrap_err();

        assert_eq!(err.step, SectionStep::Write);
        assert!(matches!(
            err.failure,
            SectionFailure::TooShort { words: 5, floor: 20 }
        ));
        assert_eq!(buffer.read_all().await.unwrap(), "# T\n");
    }

    #[tokio::test]
    async fn research_error_skips_the_write() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![Err(
            CollaboratorError::Transport {
                message: "offline".into(),
            },
        )]));
        let writer = Arc::new(FixedWriter::new(Ok(words(50))));
        let processor = processor(researcher, writer.clone(), limiter());

        let err = processor.process("T", &title("A"), &mut buffer).await.unwrap_err();

        assert_eq!(err.step, SectionStep::Research);
        assert_eq!(err.section.as_str(), "A");
        assert!(writer.seen_research.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn thin_research_is_rejected() {
        let dir = tempdir().unwrap();
        let mut buffer = DocumentBuffer::initialize(dir.path().join("d.md"), "T").await.unwrap();
        let researcher = Arc::new(ScriptedResearcher::new(vec![
            Ok(ResearchProgress::Partial("poco".into())),
            Ok(ResearchProgress::Partial("".into())),
        ]));
        let writer = Arc::new(FixedWriter::new(Ok(words(50))));
        let processor = processor(researcher, writer, limiter());

        let err = processor.process("T", &title("A"), &mut buffer).await.unwrap_err();

        assert!(matches!(
            err.failure,
            SectionFailure::InsufficientResearch { chars: 4, floor: 10 }
        ));
    }

    #[test]
    fn body_words_ignore_the_heading() {
        assert_eq!(body_words("## Un título largo\n\nuno dos\ntres"), 3);
        assert_eq!(body_words("\n\n## Solo"), 0);
        assert_eq!(body_words(""), 0);
    }
}
