use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use pipeline::{CollaboratorError, ConfigurationError, DocumentRenderer, RenderRequest};
use tokio::process::Command;
use tracing::{debug, info};

use crate::html::{write_file, HtmlRenderer};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

const MAX_STDERR: usize = 2000;

/// Renders through an external converter.
///
/// The document is first written as HTML next to the destination, then
/// `program args...` runs with `{input}` and `{output}` replaced by the HTML
/// and artifact paths. For example `weasyprint {input} {output}`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    extension: String,
    html: HtmlRenderer,
}

impl CommandRenderer {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        extension: impl Into<String>,
        html: HtmlRenderer,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            extension: extension.into(),
            html,
        }
    }

    /// Splits a whitespace-separated command line. Quoting is not supported.
    ///
    /// # Errors
    ///
    /// Fails if the line is blank, has no `{output}` placeholder or the
    /// extension is empty.
    pub fn parse(
        command_line: &str,
        extension: &str,
        html: HtmlRenderer,
    ) -> Result<Self, ConfigurationError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ConfigurationError::new("Render command must not be empty"))?;
        let args: Vec<String> = parts.collect();
        if !args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(ConfigurationError::new(format!(
                "Render command '{command_line}' has no {OUTPUT_PLACEHOLDER} placeholder"
            )));
        }
        let extension = extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return Err(ConfigurationError::new("Render extension must not be empty"));
        }
        Ok(Self::new(program, args, extension, html))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|a| {
                a.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentRenderer for CommandRenderer {
    fn artifact_extension(&self) -> &str {
        &self.extension
    }

    async fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf, CollaboratorError> {
        let html_path = request.destination.with_extension("source.html");
        let document = self.html.build_document(request.markdown, request.cover).await;
        write_file(&html_path, document.as_bytes()).await?;

        let args = self.expand_args(&html_path, request.destination);
        debug!(program = %self.program, ?args, "Running render command");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CollaboratorError::Command {
                program: self.program.clone(),
                code: None,
                stderr: format!("Failed to start: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Command {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: stderr.trim().chars().take(MAX_STDERR).collect(),
            });
        }

        info!(
            program = %self.program,
            path = %request.destination.display(),
            "Render command finished"
        );
        Ok(request.destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html() -> HtmlRenderer {
        HtmlRenderer::new("en")
    }

    #[test]
    fn parse_requires_output_placeholder() {
        assert!(CommandRenderer::parse("weasyprint {input}", "pdf", html()).is_err());
        assert!(CommandRenderer::parse("   ", "pdf", html()).is_err());
        assert!(CommandRenderer::parse("weasyprint {input} {output}", ".", html()).is_err());
    }

    #[test]
    fn parse_strips_extension_dot() {
        let renderer = CommandRenderer::parse("weasyprint {input} {output}", ".pdf", html()).unwrap();
        assert_eq!(renderer.artifact_extension(), "pdf");
        assert_eq!(renderer.program(), "weasyprint");
    }

    #[test]
    fn placeholders_are_substituted() {
        let renderer =
            CommandRenderer::parse("conv --from={input} -o {output}", "pdf", html()).unwrap();
        let args = renderer.expand_args(Path::new("/w/a.html"), Path::new("/w/a.pdf"));
        assert_eq!(args, vec!["--from=/w/a.html", "-o", "/w/a.pdf"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converter_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("document.out");
        let renderer = CommandRenderer::parse("cp {input} {output}", "out", html()).unwrap();

        let path = renderer
            .render(&RenderRequest {
                markdown: "# Title\n\nBody.",
                cover: None,
                destination: &dest,
            })
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert!(std::fs::read_to_string(&dest).unwrap().contains("<h1>Title</h1>"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("document.pdf");
        let renderer = CommandRenderer::parse("false {output}", "pdf", html()).unwrap();

        let err = renderer
            .render(&RenderRequest {
                markdown: "# T",
                cover: None,
                destination: &dest,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::Command { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("document.pdf");
        let renderer =
            CommandRenderer::parse("scriptorium-no-such-converter {output}", "pdf", html())
                .unwrap();

        let err = renderer
            .render(&RenderRequest {
                markdown: "# T",
                cover: None,
                destination: &dest,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::Command { code: None, .. }));
    }
}
