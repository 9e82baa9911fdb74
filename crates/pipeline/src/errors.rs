//! Error taxonomy and retry-policy types for the Scriptorium pipeline domain.
//!
//! Errors are split by what they do to a run:
//!
//! | Error | Effect |
//! |-------|--------|
//! | [`PlanError`] | fatal: no plan, no document |
//! | [`SectionError`] | recoverable: the section is skipped |
//! | [`AssetError`] | recoverable: the document has no cover |
//! | [`CompileError`] | fatal: no artifact |
//! | [`FinalizeError`] | fatal: artifact not delivered |
//! | [`RunError::Cancelled`] | fatal, reported distinctly |
//!
//! [`CollaboratorError`] is what every port returns; [`RetryPolicy`] is the
//! cross-cutting answer to "may this be attempted again, and when".

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RunStage, SectionTitle};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by collaborator errors to let the executor decide whether another
/// section attempt is worthwhile.
///
/// - `Retryable` errors: timeouts, transport failures, rate-limit responses,
///   empty or too-short generations.
/// - `NonRetryable` errors: rejected credentials, malformed requests, local I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt (e.g. from a `Retry-After`
        /// header). `None` means retry immediately.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// Failure of a call to an external collaborator (LLM, search, image host,
/// renderer).
///
/// Infrastructure adapters translate their transport-specific errors into this
/// type so the orchestration layer never sees `reqwest` or process details.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    /// The call did not complete within its bounded timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Label of the timed-out operation (e.g. `"write"`).
        operation: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The request never produced a response (connection refused, DNS, TLS).
    #[error("Transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The remote service answered with an error status.
    #[error("Provider returned status {status}: {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body or provider message.
        message: String,
        /// Whether the status permits another attempt.
        retry: RetryPolicy,
    },

    /// The service answered successfully but with no usable content.
    #[error("Collaborator returned an empty response")]
    EmptyResponse,

    /// The response could not be decoded.
    #[error("Malformed response: {message}")]
    Malformed {
        /// Decoding failure description.
        message: String,
    },

    /// An external command exited unsuccessfully.
    #[error("Command '{program}' failed (exit code {code:?}): {stderr}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Captured standard error (possibly truncated).
        stderr: String,
    },

    /// Local file-system failure while handling the collaborator's output.
    #[error("I/O failure: {message}")]
    Io {
        /// Description of the I/O failure.
        message: String,
    },
}

impl CollaboratorError {
    /// Retry classification of this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            CollaboratorError::Timeout { .. }
            | CollaboratorError::Transport { .. }
            | CollaboratorError::EmptyResponse => RetryPolicy::Retryable { after: None },
            CollaboratorError::Provider { retry, .. } => retry.clone(),
            CollaboratorError::Malformed { .. }
            | CollaboratorError::Command { .. }
            | CollaboratorError::Io { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// Builds a [`CollaboratorError::Io`] from a `std::io::Error`.
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        CollaboratorError::Io {
            message: format!("{context}: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer errors
// ---------------------------------------------------------------------------

/// Failures of the append-only document buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The backing file could not be created, written, or read.
    #[error("Document buffer I/O failed at {path}: {source}")]
    Io {
        /// Backing file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An append was attempted with no content after normalisation.
    #[error("Refusing to append empty content to the document buffer")]
    EmptyAppend,
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// The Plan stage could not produce a usable section plan. Fatal.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The outline collaborator failed.
    #[error("Outline generation failed: {0}")]
    Outline(#[source] CollaboratorError),

    /// The outline contained no qualifying second-level headings.
    #[error("Outline contained no usable sections")]
    EmptyPlan,
}

/// Which half of a section's research → write chain failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStep {
    /// Gathering material for the section.
    Research,
    /// Producing and appending the section prose.
    Write,
}

impl std::fmt::Display for SectionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionStep::Research => write!(f, "research"),
            SectionStep::Write => write!(f, "write"),
        }
    }
}

/// The cause of a [`SectionError`].
#[derive(Debug, Error)]
pub enum SectionFailure {
    /// The collaborator call failed or timed out.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Research produced less material than the configured floor.
    #[error("research produced {chars} characters, below the floor of {floor}")]
    InsufficientResearch {
        /// Characters of research gathered.
        chars: usize,
        /// Configured minimum.
        floor: usize,
    },

    /// The written section body is shorter than the configured floor.
    #[error("section body has {words} words, below the floor of {floor}")]
    TooShort {
        /// Words in the generated body.
        words: usize,
        /// Configured minimum.
        floor: usize,
    },

    /// The buffer rejected the append.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// One section could not be researched or written. Recoverable: the executor
/// records it and moves on to the next section.
#[derive(Debug, Error)]
#[error("Section '{section}' failed during {step}: {failure}")]
pub struct SectionError {
    /// Title of the failed section.
    pub section: SectionTitle,
    /// Step that failed.
    pub step: SectionStep,
    /// What went wrong.
    #[source]
    pub failure: SectionFailure,
}

impl SectionError {
    /// Creates a section error.
    pub fn new(section: SectionTitle, step: SectionStep, failure: impl Into<SectionFailure>) -> Self {
        Self {
            section,
            step,
            failure: failure.into(),
        }
    }

    /// Whether another attempt at this section could succeed.
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.failure {
            SectionFailure::Collaborator(e) => e.retry_policy(),
            SectionFailure::InsufficientResearch { .. } | SectionFailure::TooShort { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            SectionFailure::Buffer(_) => RetryPolicy::NonRetryable,
        }
    }
}

/// The cover asset could not be obtained. Recoverable: the document is
/// rendered without a cover image.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The image search itself failed.
    #[error("Cover image search failed: {0}")]
    Search(#[source] CollaboratorError),

    /// The search returned no candidates.
    #[error("Cover image search returned no candidates")]
    NoCandidates,

    /// Every attempted candidate failed to download.
    #[error("No cover candidate could be fetched after {attempts} attempt(s)")]
    Exhausted {
        /// Number of candidates tried.
        attempts: usize,
        /// Failure of the last candidate tried.
        #[source]
        last: CollaboratorError,
    },
}

/// The rendered artifact could not be produced. Fatal.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The buffer could not be read back.
    #[error("Could not read the document buffer: {0}")]
    Buffer(#[source] BufferError),

    /// The renderer failed or timed out.
    #[error("Renderer failed: {0}")]
    Renderer(#[source] CollaboratorError),

    /// The renderer reported success but no file exists at the returned path.
    #[error("Renderer reported {path} but the file does not exist")]
    Missing {
        /// Path reported by the renderer.
        path: PathBuf,
    },

    /// The artifact is smaller than the configured byte floor.
    #[error("Artifact {path} is {bytes} bytes, below the floor of {floor}")]
    Undersized {
        /// Artifact path.
        path: PathBuf,
        /// Actual size.
        bytes: u64,
        /// Configured minimum.
        floor: u64,
    },
}

/// The compiled artifact could not be delivered to the output directory. Fatal.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// Moving the artifact failed.
    #[error("Failed to move artifact from {from} to {to}: {source}")]
    Relocate {
        /// Compiled artifact path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Nothing exists at the destination after relocation.
    #[error("Artifact missing at destination {path}")]
    Missing {
        /// Destination path.
        path: PathBuf,
    },

    /// The delivered artifact is smaller than the configured byte floor.
    #[error("Delivered artifact {path} is {bytes} bytes, below the floor of {floor}")]
    Undersized {
        /// Destination path.
        path: PathBuf,
        /// Actual size.
        bytes: u64,
        /// Configured minimum.
        floor: u64,
    },
}

// ---------------------------------------------------------------------------
// State errors
// ---------------------------------------------------------------------------

/// An attempted [`crate::RunState`] mutation would break one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The stage graph does not permit this transition.
    #[error("Illegal stage transition {from} -> {to}")]
    IllegalTransition {
        /// Current stage.
        from: RunStage,
        /// Requested stage.
        to: RunStage,
    },

    /// The plan can only be set once, while the run is in `Init`.
    #[error("Section plan is frozen in stage {stage}")]
    PlanFrozen {
        /// Current stage.
        stage: RunStage,
    },

    /// An empty plan was offered.
    #[error("Section plan must not be empty")]
    EmptyPlan,

    /// A section outcome was recorded outside the section loop.
    #[error("Section outcomes can only be recorded while sectioning, not in {stage}")]
    NotSectioning {
        /// Current stage.
        stage: RunStage,
    },

    /// Every planned section already has an outcome.
    #[error("Cursor already at the end of a {len}-section plan")]
    CursorExhausted {
        /// Plan length.
        len: usize,
    },

    /// The cover was already resolved for this run.
    #[error("Cover asset already resolved for this run")]
    CoverAlreadyResolved,

    /// The section loop cannot end while planned sections remain unattempted.
    #[error("{remaining} planned section(s) not yet attempted")]
    SectionsPending {
        /// Sections without an outcome.
        remaining: usize,
    },

    /// The target stage carries data and must be entered through its dedicated
    /// method (`set_artifact`, `finalize`, `fail`).
    #[error("Stage {to} must be entered with its payload")]
    RequiresPayload {
        /// Requested stage.
        to: RunStage,
    },
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Classification of a fatal run failure, persisted in the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// See [`PlanError`].
    Plan,
    /// The document buffer could not be created.
    Buffer,
    /// See [`CompileError`].
    Compile,
    /// See [`FinalizeError`].
    Finalize,
    /// An external stop signal ended the run.
    Cancelled,
    /// The run workspace could not be prepared.
    Workspace,
    /// A state invariant was violated (a bug, not an environmental failure).
    State,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Plan => "plan",
            FailureKind::Buffer => "buffer",
            FailureKind::Compile => "compile",
            FailureKind::Finalize => "finalize",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Workspace => "workspace",
            FailureKind::State => "state",
        };
        write!(f, "{s}")
    }
}

/// Errors that end a run in the `Failed` stage.
#[derive(Debug, Error)]
pub enum RunError {
    /// No usable section plan.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The document buffer could not be initialised.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// No artifact could be compiled.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The artifact could not be delivered.
    #[error(transparent)]
    Finalize(#[from] FinalizeError),

    /// An external cancellation signal was observed at a stage or section boundary.
    #[error("Run cancelled during stage {stage}")]
    Cancelled {
        /// Stage at which cancellation was observed.
        stage: RunStage,
    },

    /// The isolated run workspace could not be prepared.
    #[error("Failed to prepare run workspace {path}: {source}")]
    Workspace {
        /// Workspace directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A state invariant was violated.
    #[error(transparent)]
    State(#[from] StateError),
}

impl RunError {
    /// Classifies this error for the persisted run state.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RunError::Plan(_) => FailureKind::Plan,
            RunError::Buffer(_) => FailureKind::Buffer,
            RunError::Compile(_) => FailureKind::Compile,
            RunError::Finalize(_) => FailureKind::Finalize,
            RunError::Cancelled { .. } => FailureKind::Cancelled,
            RunError::Workspace { .. } => FailureKind::Workspace,
            RunError::State(_) => FailureKind::State,
        }
    }

    /// Returns `true` if the run was stopped by an external signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::Cancelled { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The run configuration is invalid.
///
/// Produced at load time; a run never starts with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// Description of the configuration problem.
    pub message: String,
}

impl ConfigurationError {
    /// Creates a configuration error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
