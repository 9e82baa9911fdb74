//! Scriptorium pipeline stages and the run executor.
//!
//! This crate sequences the collaborator calls of a document run: section
//! planning, the research → write chain per section, cover resolution,
//! compilation and delivery. All remote calls go through one [`Gateway`] that
//! applies the run's [`RateLimiter`] and a bounded timeout.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Stages sequence calls between business logic in the
//! [`pipeline`] crate and the infrastructure ports (LLM, search, renderer).
//! They contain no domain rules of their own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`rate_limiter`] | Sliding-window call budget |
//! | [`gateway`] | Rate limit + timeout wrapper for collaborator calls |
//! | [`buffer`] | Append-only, file-backed document body |
//! | [`workspace`] | Per-run scratch directory and `run.json` persistence |
//! | [`section`] | Research → write chain for one section |
//! | [`cover`] | Best-effort cover image acquisition |
//! | [`compile`] | Rendering, artifact validation, delivery |
//! | [`executor`] | The run state machine |
//! | [`collaborators`], [`prompts`] | LLM-backed outline, research and writing |
//! | [`settings`] | `PipelineSettings` |

pub mod buffer;
pub mod collaborators;
pub mod compile;
pub mod cover;
pub mod executor;
pub mod gateway;
pub mod prompts;
pub mod rate_limiter;
pub mod section;
pub mod settings;
pub mod workspace;

pub use buffer::{AppendReport, DocumentBuffer};
pub use collaborators::{LlmOutlineGenerator, LlmResearcher, LlmSectionWriter};
pub use compile::{finalize_artifact, CompiledArtifact, Compiler};
pub use cover::CoverAssetResolver;
pub use executor::{Collaborators, OutputPaths, PipelineExecutor};
pub use gateway::Gateway;
pub use rate_limiter::RateLimiter;
pub use section::{SectionProcessor, SectionReport};
pub use settings::{PipelineSettings, MAX_RATE_LIMIT};
pub use workspace::RunWorkspace;
