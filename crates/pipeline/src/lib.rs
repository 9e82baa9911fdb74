//! Core orchestration domain for Scriptorium.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, the section-plan parser, and the error taxonomy used throughout the
//! document pipeline. Infrastructure crates implement the port traits defined
//! here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `SectionTitle`, `TopicSlug`) |
//! | [`types`] | Shared value types (`BufferStats`, `Timestamp`) |
//! | [`state`] | `RunStage`, `RunState`, `SectionOutcome`, `RunSummary` |
//! | [`plan`] | Outline → section plan parser |
//! | [`ports`] | Collaborator traits (LLM, search, images, renderer) |
//! | [`errors`] | Error taxonomy and retry-policy types |

pub mod errors;
pub mod identifiers;
pub mod plan;
pub mod ports;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{
    AssetError, BufferError, CollaboratorError, CompileError, ConfigurationError, FailureKind,
    FinalizeError, PlanError, RetryPolicy, RunError, SectionError, SectionFailure, SectionStep,
    StateError,
};
pub use identifiers::{RunId, SectionTitle, TopicSlug};
pub use plan::{parse_section_plan, PlanPolicy};
pub use ports::{
    Completion, CompletionRequest, DocumentRenderer, ImageCandidate, ImageSource, LlmProvider,
    OutlineGenerator, RenderRequest, ResearchProgress, ResearchRequest, Researcher, SearchHit,
    SectionWriter, WebSearch, WriteRequest,
};
pub use state::{RunStage, RunState, RunSummary, SectionOutcome, SkippedSection};
pub use types::{BufferStats, Timestamp};
