//! Layered application configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config`, else `scriptorium.toml` in the working directory)
//! 3. Environment (`.env` is loaded first)
//! 4. Command-line flags
//!
//! ```toml
//! [llm]
//! base_url = "http://localhost:11434/v1"
//! # Optional; when unset the server's installed models are queried.
//! model = "gemma3:4b"
//!
//! [search]
//! enabled = true
//! country = "es"
//! language = "es"
//!
//! [render]
//! command = "weasyprint {input} {output}"
//! extension = "pdf"
//! cover = true
//!
//! [paths]
//! work_dir = "work"
//! output_dir = "output"
//!
//! [pipeline]
//! rate_limit = 10
//!
//! [logging]
//! format = "text"
//! ```

use std::path::{Path, PathBuf};

use nodes::PipelineSettings;
use pipeline::ConfigurationError;
use serde::{Deserialize, Serialize};

/// File looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "scriptorium.toml";

pub const ENV_API_KEY: &str = "SCRIPTORIUM_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_SERPER_API_KEY: &str = "SERPER_API_KEY";
pub const ENV_BASE_URL: &str = "SCRIPTORIUM_BASE_URL";
pub const ENV_MODEL: &str = "SCRIPTORIUM_MODEL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub search: SearchSection,
    pub render: RenderSection,
    pub paths: PathsSection,
    pub pipeline: PipelineSettings,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `None` selects a model from the server's installed ones at startup.
    #[serde(default)]
    pub model: Option<String>,
    /// Usually supplied through the environment rather than the file.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    llm::DEFAULT_BASE_URL.to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    /// Ground research in web search results.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_locale")]
    pub country: String,
    #[serde(default = "default_locale")]
    pub language: String,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

fn default_true() -> bool {
    true
}

fn default_locale() -> String {
    "es".to_string()
}

fn default_search_endpoint() -> String {
    search::DEFAULT_SERPER_ENDPOINT.to_string()
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            country: default_locale(),
            language: default_locale(),
            endpoint: default_search_endpoint(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSection {
    /// External converter, e.g. `weasyprint {input} {output}`. Without it the
    /// artifact is the HTML document itself.
    #[serde(default)]
    pub command: Option<String>,
    /// Artifact extension produced by `command`.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Look for a cover image.
    #[serde(default = "default_true")]
    pub cover: bool,
}

fn default_extension() -> String {
    "pdf".to_string()
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            command: None,
            extension: default_extension(),
            cover: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    /// Root of per-run workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Where finished artifacts are delivered.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// OTLP gRPC collector, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: default_filter(),
            otlp_endpoint: None,
        }
    }
}

/// Command-line values that override every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub rate_limit: Option<u32>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub language: Option<String>,
    pub render_command: Option<String>,
    pub no_search: bool,
    pub no_cover: bool,
    pub log_format: Option<LogFormat>,
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Loads every layer and validates the result.
    ///
    /// `explicit_file` must exist when given; the default file is optional.
    pub fn load(
        explicit_file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigurationError> {
        let mut config = match explicit_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(env);
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::new(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| ConfigurationError::new(format!("{}: {}", path.display(), e.message)))
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(text).map_err(|e| ConfigurationError::new(format!("Invalid TOML: {e}")))
    }

    /// Applies environment variables; blank values are ignored.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY).or_else(|| get(ENV_OPENAI_API_KEY)) {
            self.llm.api_key = Some(key);
        }
        if let Some(key) = get(ENV_SERPER_API_KEY) {
            self.search.api_key = Some(key);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.llm.base_url = url;
        }
        if let Some(model) = get(ENV_MODEL) {
            self.llm.model = Some(model);
        }
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(model) = &o.model {
            self.llm.model = Some(model.clone());
        }
        if let Some(rate) = o.rate_limit {
            self.pipeline.rate_limit = rate;
        }
        if let Some(key) = &o.api_key {
            self.llm.api_key = Some(key.clone());
        }
        if let Some(url) = &o.base_url {
            self.llm.base_url.clone_from(url);
        }
        if let Some(dir) = &o.work_dir {
            self.paths.work_dir.clone_from(dir);
        }
        if let Some(dir) = &o.output_dir {
            self.paths.output_dir.clone_from(dir);
        }
        if let Some(language) = &o.language {
            self.pipeline.language.clone_from(language);
        }
        if let Some(command) = &o.render_command {
            self.render.command = Some(command.clone());
        }
        if o.no_search {
            self.search.enabled = false;
        }
        if o.no_cover {
            self.render.cover = false;
        }
        if let Some(format) = o.log_format {
            self.logging.format = format;
        }
        if let Some(endpoint) = &o.otlp_endpoint {
            self.logging.otlp_endpoint = Some(endpoint.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.pipeline.validate()?;
        if self.llm.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(ConfigurationError::new("llm.model must not be empty"));
        }
        if self.render.command.is_some() && self.render.extension.trim().is_empty() {
            return Err(ConfigurationError::new(
                "render.extension must be set when render.command is",
            ));
        }
        if self.paths.work_dir.as_os_str().is_empty() || self.paths.output_dir.as_os_str().is_empty()
        {
            return Err(ConfigurationError::new("paths must not be empty"));
        }
        Ok(())
    }

    /// Search is used when enabled and a key is available.
    pub fn search_active(&self) -> bool {
        self.search.enabled && self.serper_key().is_some()
    }

    /// Cover lookup is used when enabled and a key is available.
    pub fn cover_active(&self) -> bool {
        self.render.cover && self.serper_key().is_some()
    }

    pub fn serper_key(&self) -> Option<&str> {
        self.search
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
