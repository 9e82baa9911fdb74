//! Scriptorium CLI entry point.
//!
//! This binary is the composition root. It:
//!
//! 1. **Loads configuration** from defaults, `scriptorium.toml`, the
//!    environment (`.env` included) and flags, in that order.
//! 2. **Wires observability**: a `tracing-subscriber` text or JSON layer and,
//!    when an endpoint is configured, an OpenTelemetry OTLP exporter.
//! 3. **Constructs infrastructure**: the OpenAI-compatible LLM provider, the
//!    Serper search client and the renderer, injected into `PipelineExecutor`.
//! 4. **Runs one topic** with Ctrl-C wired to cancellation, prints the summary
//!    and exits with its status.
//!
//! ## Exit status
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Document delivered |
//! | 1 | Run failed |
//! | 2 | Invalid configuration |
//! | 130 | Cancelled |

mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use llm::{LlmConfig, ModelChoice, OpenAiCompatibleProvider};
use nodes::{
    Collaborators, LlmOutlineGenerator, LlmResearcher, LlmSectionWriter, OutputPaths,
    PipelineExecutor,
};
use pipeline::{DocumentRenderer, FailureKind, ImageSource, LlmProvider, RunStage, RunSummary, WebSearch};
use render::{CommandRenderer, HtmlRenderer};
use search::{SerperClient, SerperConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, LogFormat, Overrides};

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Turn a topic into a researched, multi-section document.
#[derive(Parser, Debug)]
#[command(name = "scriptorium")]
#[command(version, about, long_about = None)]
struct Args {
    /// Subject of the document
    topic: String,

    /// Model name on the LLM server
    #[arg(long)]
    model: Option<String>,

    /// Maximum external calls per minute (1-600)
    #[arg(long)]
    rate_limit: Option<u32>,

    /// LLM API key
    #[arg(long)]
    api_key: Option<String>,

    /// OpenAI-compatible server URL
    #[arg(long)]
    base_url: Option<String>,

    /// Configuration file (default: ./scriptorium.toml if present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory for per-run workspaces
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Directory receiving the finished document
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Document language (ISO 639-1)
    #[arg(long)]
    language: Option<String>,

    /// External converter, e.g. "weasyprint {input} {output}"
    #[arg(long)]
    render_command: Option<String>,

    /// Research without web search
    #[arg(long)]
    no_search: bool,

    /// Skip the cover image
    #[arg(long)]
    no_cover: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// OTLP gRPC endpoint for trace export
    #[arg(long, value_name = "URL")]
    otlp_endpoint: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            rate_limit: self.rate_limit,
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
            language: self.language.clone(),
            render_command: self.render_command.clone(),
            no_search: self.no_search,
            no_cover: self.no_cover,
            log_format: self.log_format,
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = ignore_missing(dotenvy::dotenv()) {
        eprintln!("Configuration error: invalid .env file: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }

    let config = match AppConfig::load(
        args.config.as_deref(),
        |name| std::env::var(name).ok(),
        &args.overrides(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let telemetry = match telemetry::init(&config.logging, args.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let executor = match build_executor(&config).await {
        Ok(executor) => executor,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Invalid configuration");
            telemetry.shutdown();
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let summary = executor.run(&args.topic, &cancel).await;
    print_summary(&summary, config.logging.format);

    telemetry.shutdown();
    ExitCode::from(exit_status(&summary))
}

/// A missing `.env` is normal; unreadable or malformed ones are errors.
fn ignore_missing<T>(result: dotenvy::Result<T>) -> dotenvy::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Builds the provider, asking the server for a model when none is configured.
async fn connect_llm(config: &AppConfig) -> anyhow::Result<OpenAiCompatibleProvider> {
    let provider = OpenAiCompatibleProvider::new(LlmConfig {
        base_url: config.llm.base_url.clone(),
        model: config
            .llm
            .model
            .clone()
            .unwrap_or_else(|| llm::DEFAULT_MODEL.to_string()),
        api_key: config.llm.api_key.clone(),
        request_timeout: config.pipeline.call_timeout(),
    })
    .context("LLM provider")?;
    if config.llm.model.is_some() {
        return Ok(provider);
    }

    let installed = provider.list_models().await.with_context(|| {
        format!(
            "Cannot list models at {} (set llm.model to skip discovery)",
            provider.endpoint()
        )
    })?;
    match llm::choose_model(llm::DEFAULT_MODEL, &installed).context("LLM model")? {
        ModelChoice::Preferred(model) => {
            info!(model = %model, "Using default model");
            Ok(provider.with_model(model))
        }
        ModelChoice::Fallback(model) => {
            warn!(
                preferred = llm::DEFAULT_MODEL,
                model = %model,
                installed = installed.len(),
                "Default model not installed; using another installed model"
            );
            Ok(provider.with_model(model))
        }
    }
}

async fn build_executor(config: &AppConfig) -> anyhow::Result<PipelineExecutor> {
    let settings = config.pipeline.clone();
    let language = settings.language.clone();

    let provider = connect_llm(config).await?;
    let model = provider.model().to_string();
    let llm: Arc<dyn LlmProvider> = Arc::new(provider);

    let serper = match config.serper_key() {
        Some(key) if config.search.enabled || config.render.cover => {
            let mut serper_config = SerperConfig::new(key);
            serper_config.country.clone_from(&config.search.country);
            serper_config.language.clone_from(&config.search.language);
            serper_config.endpoint.clone_from(&config.search.endpoint);
            Some(Arc::new(
                SerperClient::new(serper_config).context("Serper client")?,
            ))
        }
        Some(_) => None,
        None => {
            if config.search.enabled || config.render.cover {
                warn!("SERPER_API_KEY not set; running without web search and cover image");
            }
            None
        }
    };
    let web: Option<Arc<dyn WebSearch>> = serper
        .clone()
        .filter(|_| config.search_active())
        .map(|s| s as Arc<dyn WebSearch>);
    let images: Option<Arc<dyn ImageSource>> = serper
        .filter(|_| config.cover_active())
        .map(|s| s as Arc<dyn ImageSource>);

    let html = HtmlRenderer::new(language.clone());
    let renderer: Arc<dyn DocumentRenderer> = match &config.render.command {
        Some(command) => Arc::new(
            CommandRenderer::parse(command, &config.render.extension, html)
                .context("Render command")?,
        ),
        None => Arc::new(html),
    };

    info!(
        model = %model,
        base_url = %llm::normalize_base_url(&config.llm.base_url),
        rate_limit = settings.rate_limit,
        search = web.is_some(),
        cover = images.is_some(),
        artifact = renderer.artifact_extension(),
        "Pipeline configured"
    );

    let collaborators = Collaborators {
        outline: Arc::new(LlmOutlineGenerator::new(llm.clone(), language.clone())),
        researcher: Arc::new(LlmResearcher::new(llm.clone(), web, language.clone())),
        writer: Arc::new(LlmSectionWriter::new(llm, language)),
        images,
        renderer,
    };
    let paths = OutputPaths {
        work_root: config.paths.work_dir.clone(),
        output_dir: config.paths.output_dir.clone(),
    };
    Ok(PipelineExecutor::new(collaborators, settings, paths))
}

fn exit_status(summary: &RunSummary) -> u8 {
    match (summary.stage, summary.failure_kind) {
        (RunStage::Finalized, _) => 0,
        (_, Some(FailureKind::Cancelled)) => EXIT_CANCELLED,
        _ => EXIT_FAILED,
    }
}

fn print_summary(summary: &RunSummary, format: LogFormat) {
    if format == LogFormat::Json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialize run summary: {e}"),
        }
        return;
    }

    println!("Run {} ({}): {}", summary.run_id, summary.topic, summary.stage);
    println!(
        "  sections: {} written, {} skipped of {}",
        summary.sections_written,
        summary.sections_skipped(),
        summary.sections_total
    );
    for skipped in &summary.skipped {
        println!("    - {} [{}]: {}", skipped.title, skipped.step, skipped.reason);
    }
    println!(
        "  document: {} words, {} lines ({})",
        summary.document.words,
        summary.document.lines,
        summary.buffer_path.display()
    );
    println!("  cover: {}", if summary.cover { "yes" } else { "no" });
    if let (Some(path), Some(mb)) = (&summary.artifact_path, summary.artifact_megabytes()) {
        println!("  artifact: {} ({mb:.2} MB)", path.display());
    }
    if let Some(reason) = &summary.failure_reason {
        let kind = summary
            .failure_kind
            .map(|k| k.to_string())
            .unwrap_or_default();
        println!("  failure [{kind}]: {reason}");
    }
    println!("  elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_parse_into_overrides() {
        let args = Args::try_parse_from([
            "scriptorium",
            "Redes neuronales",
            "--rate-limit",
            "20",
            "--no-cover",
            "--log-format",
            "json",
        ])
        .unwrap();

        let o = args.overrides();
        assert_eq!(args.topic, "Redes neuronales");
        assert_eq!(o.rate_limit, Some(20));
        assert!(o.no_cover);
        assert!(!o.no_search);
        assert_eq!(o.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn missing_env_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ignore_missing(dotenvy::from_path(dir.path().join(".env"))).is_ok());
    }

    #[test]
    fn malformed_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "this is not valid\n").unwrap();
        assert!(ignore_missing(dotenvy::from_path(&path)).is_err());
    }

    #[test]
    fn topic_is_required() {
        assert!(Args::try_parse_from(["scriptorium"]).is_err());
    }

    /// Serves one canned `/models` reply and returns the base URL.
    async fn serve_models(status: &str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/v1")
    }

    fn config_without_model(base_url: String) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.base_url = base_url;
        config
    }

    #[tokio::test]
    async fn executor_builds_from_defaults() {
        let mut config = AppConfig::default();
        config.llm.model = Some("llama3".into());
        let executor = build_executor(&config).await.unwrap();
        assert_eq!(executor.settings().rate_limit, 10);
    }

    #[tokio::test]
    async fn bad_render_command_is_a_configuration_error() {
        let mut config = AppConfig::default();
        config.llm.model = Some("llama3".into());
        config.render.command = Some("weasyprint {input}".into());
        assert!(build_executor(&config).await.is_err());
    }

    #[tokio::test]
    async fn configured_model_skips_discovery() {
        let mut config = config_without_model("http://127.0.0.1:9/v1".into());
        config.llm.model = Some("mistral".into());
        let provider = connect_llm(&config).await.unwrap();
        assert_eq!(provider.model(), "mistral");
    }

    #[tokio::test]
    async fn default_model_is_used_when_installed() {
        let base = serve_models("200 OK", r#"{"data":[{"id":"llama3"},{"id":"gemma3:4b"}]}"#).await;
        let provider = connect_llm(&config_without_model(base)).await.unwrap();
        assert_eq!(provider.model(), llm::DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn installed_model_replaces_missing_default() {
        let base = serve_models("200 OK", r#"{"data":[{"id":"llama3"}]}"#).await;
        let provider = connect_llm(&config_without_model(base)).await.unwrap();
        assert_eq!(provider.model(), "llama3");
    }

    #[tokio::test]
    async fn no_installed_models_is_a_configuration_error() {
        let base = serve_models("200 OK", r#"{"data":[]}"#).await;
        let err = build_executor(&config_without_model(base)).await.err().expect("expected an error");
        assert!(format!("{err:#}").contains("No models are installed"));
    }

    #[tokio::test]
    async fn failed_model_listing_is_a_configuration_error() {
        let base = serve_models("500 Internal Server Error", r#"{"error":"down"}"#).await;
        let err = build_executor(&config_without_model(base)).await.err().expect("expected an error");
        assert!(format!("{err:#}").contains("set llm.model"));
    }
}
