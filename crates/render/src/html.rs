use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, NaiveDate};
use pipeline::{CollaboratorError, DocumentRenderer, RenderRequest};
use pulldown_cmark::{html, Options, Parser};
use tracing::{debug, warn};

/// Title used when the Markdown has no `# ` heading.
pub const DEFAULT_TITLE: &str = "Document";

const STYLESHEET: &str = r#"
@page {
    size: A4;
    margin: 2.5cm;
    @bottom-center {
        content: counter(page);
        font-family: Arial, sans-serif;
        font-size: 10pt;
        color: #666;
    }
}
@page :first {
    @bottom-center { content: none; }
}
body {
    font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
    line-height: 1.6;
    color: #333;
    font-size: 11pt;
}
h1 {
    color: #2c3e50;
    border-bottom: 3px solid #3498db;
    padding-bottom: 10px;
    font-size: 24pt;
}
h2 {
    color: #34495e;
    border-bottom: 2px solid #95a5a6;
    padding-bottom: 5px;
    margin-top: 25px;
    font-size: 18pt;
    break-after: avoid;
}
h3 { color: #7f8c8d; margin-top: 20px; font-size: 14pt; }
p { margin-bottom: 12px; text-align: justify; }
ul, ol { margin-bottom: 15px; padding-left: 25px; }
code {
    background-color: #f8f9fa;
    padding: 2px 5px;
    border-radius: 3px;
    font-family: 'Courier New', monospace;
    font-size: 10pt;
}
pre {
    background-color: #f8f9fa;
    padding: 15px;
    border-left: 4px solid #3498db;
    white-space: pre-wrap;
}
blockquote {
    border-left: 4px solid #3498db;
    margin: 15px 0;
    padding: 10px 20px;
    background-color: #f8f9fa;
    font-style: italic;
}
table { width: 100%; border-collapse: collapse; margin: 15px 0; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
th { background-color: #f2f2f2; }
.footnote-definition { font-size: 9pt; color: #555; }
.cover {
    text-align: center;
    break-after: page;
    padding-top: 4cm;
}
.cover img {
    max-width: 14cm;
    max-height: 11cm;
    margin-bottom: 1.5cm;
    border-radius: 12px;
}
.cover h1 { font-size: 32pt; border: none; }
.cover .issued { font-size: 14pt; color: #7f8c8d; font-style: italic; margin-top: 1cm; }
"#;

const SPANISH_MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Renders Markdown to one self-contained HTML file.
///
/// The output always starts with a title page (cover image when available,
/// document title, month and year) followed by the converted body.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    language: String,
    issued: Option<NaiveDate>,
}

impl HtmlRenderer {
    /// `language` selects the month names on the title page (`es` or English).
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            issued: None,
        }
    }

    /// Pins the title-page date instead of using today.
    pub fn with_issue_date(mut self, date: NaiveDate) -> Self {
        self.issued = Some(date);
        self
    }

    /// Builds the complete HTML document.
    pub(crate) async fn build_document(&self, markdown: &str, cover: Option<&Path>) -> String {
        let title = document_title(markdown);
        let issued = self.issued.unwrap_or_else(|| chrono::Local::now().date_naive());
        let cover_uri = match cover {
            Some(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Some(data_uri(path, &bytes)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cover image unreadable, omitting it");
                    None
                }
            },
            None => None,
        };

        let mut body = String::with_capacity(markdown.len() * 2);
        let options = Options::ENABLE_TABLES
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_STRIKETHROUGH;
        html::push_html(&mut body, Parser::new_ext(markdown, options));

        let mut out = String::with_capacity(body.len() + STYLESHEET.len() + 1024);
        out.push_str("<!DOCTYPE html>\n<html lang=\"");
        out.push_str(&escape_html(&self.language));
        out.push_str("\">\n<head>\n<meta charset=\"utf-8\">\n<title>");
        out.push_str(&escape_html(&title));
        out.push_str("</title>\n<style>");
        out.push_str(STYLESHEET);
        out.push_str("</style>\n</head>\n<body>\n<section class=\"cover\">\n");
        if let Some(uri) = cover_uri {
            out.push_str("<img src=\"");
            out.push_str(&uri);
            out.push_str("\" alt=\"\">\n");
        }
        out.push_str("<h1>");
        out.push_str(&escape_html(&title));
        out.push_str("</h1>\n<div class=\"issued\">");
        out.push_str(&self.issue_label(issued));
        out.push_str("</div>\n</section>\n<main>\n");
        out.push_str(&body);
        out.push_str("</main>\n</body>\n</html>\n");
        out
    }

    fn issue_label(&self, date: NaiveDate) -> String {
        if self.language.eq_ignore_ascii_case("es") {
            let month = SPANISH_MONTHS[date.month0() as usize];
            format!("{month} de {}", date.year())
        } else {
            date.format("%B %Y").to_string()
        }
    }
}

#[async_trait]
impl DocumentRenderer for HtmlRenderer {
    fn artifact_extension(&self) -> &str {
        "html"
    }

    async fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf, CollaboratorError> {
        let document = self.build_document(request.markdown, request.cover).await;
        write_file(request.destination, document.as_bytes()).await?;
        debug!(
            path = %request.destination.display(),
            bytes = document.len(),
            cover = request.cover.is_some(),
            "HTML document written"
        );
        Ok(request.destination.to_path_buf())
    }
}

pub(crate) async fn write_file(path: &Path, contents: &[u8]) -> Result<(), CollaboratorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CollaboratorError::io("Failed to create output directory", &e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| CollaboratorError::io(&format!("Failed to write {}", path.display()), &e))
}

/// First level-one heading of the Markdown, or [`DEFAULT_TITLE`].
fn document_title(markdown: &str) -> String {
    markdown
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string()
}

fn data_uri(path: &Path, bytes: &[u8]) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let mime = match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> HtmlRenderer {
        HtmlRenderer::new("es").with_issue_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
    }

    #[test]
    fn title_comes_from_first_h1() {
        assert_eq!(document_title("intro\n# Redes Neuronales \n## Uno"), "Redes Neuronales");
        assert_eq!(document_title("## Only sections"), DEFAULT_TITLE);
    }

    #[test]
    fn issue_label_uses_language() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(renderer().issue_label(date), "marzo de 2024");
        assert_eq!(HtmlRenderer::new("en").issue_label(date), "March 2024");
    }

    #[test]
    fn data_uri_mime_follows_extension() {
        assert!(data_uri(Path::new("c.png"), b"x").starts_with("data:image/png;base64,"));
        assert!(data_uri(Path::new("c.bin"), b"x").starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }

    #[tokio::test]
    async fn title_only_document_clears_byte_floor() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("document.html");

        let path = renderer()
            .render(&RenderRequest {
                markdown: "# Tema\n",
                cover: None,
                destination: &dest,
            })
            .await
            .unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.len() >= 1000);
        assert!(html.contains("<div class=\"issued\">marzo de 2024</div>"));
        assert!(!html.contains("<img"));
    }

    #[tokio::test]
    async fn extended_markdown_is_converted() {
        let md = "# T\n\n## Datos\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n~~viejo~~ nuevo[^1]\n\n[^1]: Nota.\n";
        let html = renderer().build_document(md, None).await;

        assert!(html.contains("<table>"));
        assert!(html.contains("<del>viejo</del>"));
        assert!(html.contains("footnote-definition"));
    }

    #[tokio::test]
    async fn cover_is_embedded_as_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.png");
        std::fs::write(&cover, [1u8, 2, 3]).unwrap();

        let html = renderer().build_document("# T", Some(&cover)).await;

        assert!(html.contains("<img src=\"data:image/png;base64,AQID\""));
    }

    #[tokio::test]
    async fn unreadable_cover_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let html = renderer()
            .build_document("# T", Some(&dir.path().join("missing.jpg")))
            .await;
        assert!(!html.contains("<img"));
    }
}
