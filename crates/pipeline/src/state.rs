//! Run stages and the single mutable run record.
//!
//! ```text
//! Init ─▶ Planned ─▶ SectioningInProgress ─▶ Sectioned ─▶ AssetResolved ─▶ Compiled ─▶ Finalized
//!   │        │                │                  │              │              │
//!   └────────┴────────────────┴──────────────────┴──────────────┴──────────────┴──▶ Failed
//! ```
//!
//! [`RunState`] is owned by the executor. Every mutation goes through a method
//! that checks the stage graph and the record's invariants, so a state that was
//! successfully mutated is always internally consistent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{BufferStats, FailureKind, RunId, SectionStep, SectionTitle, StateError, Timestamp};

// ---------------------------------------------------------------------------
// RunStage
// ---------------------------------------------------------------------------

/// Position of a run in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    Planned,
    SectioningInProgress,
    Sectioned,
    AssetResolved,
    Compiled,
    Finalized,
    Failed,
}

impl RunStage {
    /// `Finalized` and `Failed` end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Finalized | RunStage::Failed)
    }

    /// Whether the stage graph has an edge from `self` to `next`.
    pub fn can_advance_to(self, next: RunStage) -> bool {
        use RunStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Init, Planned)
            | (Planned, SectioningInProgress)
            | (SectioningInProgress, Sectioned)
            | (Sectioned, AssetResolved)
            | (AssetResolved, Compiled)
            | (Compiled, Finalized) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStage::Init => "init",
            RunStage::Planned => "planned",
            RunStage::SectioningInProgress => "sectioning_in_progress",
            RunStage::Sectioned => "sectioned",
            RunStage::AssetResolved => "asset_resolved",
            RunStage::Compiled => "compiled",
            RunStage::Finalized => "finalized",
            RunStage::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// SectionOutcome
// ---------------------------------------------------------------------------

/// What happened to one planned section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SectionOutcome {
    /// The section was appended to the buffer.
    Written {
        title: SectionTitle,
        /// Words and lines this section added.
        stats: BufferStats,
        attempts: u32,
    },
    /// Every attempt failed; nothing was appended.
    Skipped {
        title: SectionTitle,
        step: SectionStep,
        reason: String,
        attempts: u32,
    },
}

impl SectionOutcome {
    pub fn title(&self) -> &SectionTitle {
        match self {
            SectionOutcome::Written { title, .. } | SectionOutcome::Skipped { title, .. } => title,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, SectionOutcome::Written { .. })
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// The single mutable record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    run_id: RunId,
    topic: String,
    rate_limit: u32,
    plan: Vec<SectionTitle>,
    cursor: usize,
    buffer_path: PathBuf,
    cover_asset_path: Option<PathBuf>,
    cover_error: Option<String>,
    artifact_path: Option<PathBuf>,
    artifact_bytes: Option<u64>,
    stage: RunStage,
    failure_kind: Option<FailureKind>,
    failure_reason: Option<String>,
    sections: Vec<SectionOutcome>,
    document_stats: BufferStats,
    started_at: Timestamp,
    updated_at: Timestamp,
}

impl RunState {
    /// Creates a run in [`RunStage::Init`].
    pub fn new(run_id: RunId, topic: impl Into<String>, rate_limit: u32, buffer_path: PathBuf) -> Self {
        let now = Timestamp::now();
        Self {
            run_id,
            topic: topic.into(),
            rate_limit,
            plan: Vec::new(),
            cursor: 0,
            buffer_path,
            cover_asset_path: None,
            cover_error: None,
            artifact_path: None,
            artifact_bytes: None,
            stage: RunStage::Init,
            failure_kind: None,
            failure_reason: None,
            sections: Vec::new(),
            document_stats: BufferStats::default(),
            started_at: now,
            updated_at: now,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn plan(&self) -> &[SectionTitle] {
        &self.plan
    }

    /// Number of sections attempted so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The next section to attempt, if any remain.
    pub fn next_section(&self) -> Option<&SectionTitle> {
        self.plan.get(self.cursor)
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn cover_asset_path(&self) -> Option<&Path> {
        self.cover_asset_path.as_deref()
    }

    pub fn cover_error(&self) -> Option<&str> {
        self.cover_error.as_deref()
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn sections(&self) -> &[SectionOutcome] {
        &self.sections
    }

    pub fn document_stats(&self) -> BufferStats {
        self.document_stats
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    // -- mutation -----------------------------------------------------------

    /// Sets the section plan. Only allowed once, in `Init`, with a non-empty plan.
    pub fn set_plan(&mut self, plan: Vec<SectionTitle>) -> Result<(), StateError> {
        if self.stage != RunStage::Init || !self.plan.is_empty() {
            return Err(StateError::PlanFrozen { stage: self.stage });
        }
        if plan.is_empty() {
            return Err(StateError::EmptyPlan);
        }
        self.plan = plan;
        self.touch();
        Ok(())
    }

    /// Moves along a payload-free edge of the stage graph.
    ///
    /// `Compiled`, `Finalized` and `Failed` carry data and are entered through
    /// [`set_artifact`](Self::set_artifact), [`finalize`](Self::finalize) and
    /// [`fail`](Self::fail).
    pub fn advance(&mut self, to: RunStage) -> Result<(), StateError> {
        if matches!(to, RunStage::Compiled | RunStage::Finalized | RunStage::Failed) {
            return Err(StateError::RequiresPayload { to });
        }
        self.check_edge(to)?;
        match to {
            RunStage::Planned if self.plan.is_empty() => return Err(StateError::EmptyPlan),
            RunStage::Sectioned if self.cursor < self.plan.len() => {
                return Err(StateError::SectionsPending {
                    remaining: self.plan.len() - self.cursor,
                })
            }
            _ => {}
        }
        self.stage = to;
        self.touch();
        Ok(())
    }

    /// Records the outcome of the section under the cursor and advances the
    /// cursor, whatever the outcome.
    pub fn record_section(&mut self, outcome: SectionOutcome) -> Result<(), StateError> {
        if self.stage != RunStage::SectioningInProgress {
            return Err(StateError::NotSectioning { stage: self.stage });
        }
        if self.cursor >= self.plan.len() {
            return Err(StateError::CursorExhausted {
                len: self.plan.len(),
            });
        }
        self.sections.push(outcome);
        self.cursor += 1;
        self.touch();
        Ok(())
    }

    /// Records the current whole-document word and line counts.
    pub fn set_document_stats(&mut self, stats: BufferStats) {
        self.document_stats = stats;
        self.touch();
    }

    /// Records the resolved cover. At most once, only while `Sectioned`.
    pub fn set_cover(&mut self, path: PathBuf) -> Result<(), StateError> {
        self.check_cover_slot()?;
        self.cover_asset_path = Some(path);
        self.touch();
        Ok(())
    }

    /// Records why no cover could be resolved. Same preconditions as
    /// [`set_cover`](Self::set_cover).
    pub fn set_cover_error(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.check_cover_slot()?;
        self.cover_error = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Records the compiled artifact and enters `Compiled`.
    pub fn set_artifact(&mut self, path: PathBuf, bytes: u64) -> Result<(), StateError> {
        self.check_edge(RunStage::Compiled)?;
        self.artifact_path = Some(path);
        self.artifact_bytes = Some(bytes);
        self.stage = RunStage::Compiled;
        self.touch();
        Ok(())
    }

    /// Records the delivered artifact location and enters `Finalized`.
    pub fn finalize(&mut self, destination: PathBuf, bytes: u64) -> Result<(), StateError> {
        self.check_edge(RunStage::Finalized)?;
        self.artifact_path = Some(destination);
        self.artifact_bytes = Some(bytes);
        self.stage = RunStage::Finalized;
        self.touch();
        Ok(())
    }

    /// Ends the run in `Failed`. Allowed from any non-terminal stage.
    pub fn fail(&mut self, kind: FailureKind, reason: impl Into<String>) -> Result<(), StateError> {
        self.check_edge(RunStage::Failed)?;
        self.failure_kind = Some(kind);
        self.failure_reason = Some(reason.into());
        self.stage = RunStage::Failed;
        self.touch();
        Ok(())
    }

    /// Builds the caller-facing report of this run.
    pub fn summary(&self) -> RunSummary {
        let skipped = self
            .sections
            .iter()
            .filter_map(|s| match s {
                SectionOutcome::Skipped {
                    title, step, reason, ..
                } => Some(SkippedSection {
                    title: title.clone(),
                    step: *step,
                    reason: reason.clone(),
                }),
                SectionOutcome::Written { .. } => None,
            })
            .collect();
        RunSummary {
            run_id: self.run_id,
            topic: self.topic.clone(),
            stage: self.stage,
            sections_total: self.plan.len(),
            sections_written: self.sections.iter().filter(|s| s.is_written()).count(),
            skipped,
            buffer_path: self.buffer_path.clone(),
            document: self.document_stats,
            cover: self.cover_asset_path.is_some(),
            artifact_path: self.artifact_path.clone(),
            artifact_bytes: self.artifact_bytes,
            failure_kind: self.failure_kind,
            failure_reason: self.failure_reason.clone(),
            elapsed_ms: Timestamp::now().millis_since(self.started_at),
        }
    }

    fn check_edge(&self, to: RunStage) -> Result<(), StateError> {
        if self.stage.can_advance_to(to) {
            Ok(())
        } else {
            Err(StateError::IllegalTransition {
                from: self.stage,
                to,
            })
        }
    }

    fn check_cover_slot(&self) -> Result<(), StateError> {
        if self.stage != RunStage::Sectioned {
            return Err(StateError::IllegalTransition {
                from: self.stage,
                to: RunStage::AssetResolved,
            });
        }
        if self.cover_asset_path.is_some() || self.cover_error.is_some() {
            return Err(StateError::CoverAlreadyResolved);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// A section that ended up out of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSection {
    pub title: SectionTitle,
    pub step: SectionStep,
    pub reason: String,
}

/// Report of a run that reached a terminal stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub topic: String,
    pub stage: RunStage,
    pub sections_total: usize,
    pub sections_written: usize,
    pub skipped: Vec<SkippedSection>,
    /// The run's document buffer; its directory is the run workspace.
    pub buffer_path: PathBuf,
    /// Whole-document counts, title included.
    pub document: BufferStats,
    pub cover: bool,
    pub artifact_path: Option<PathBuf>,
    pub artifact_bytes: Option<u64>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.stage == RunStage::Finalized
    }

    pub fn sections_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Artifact size in mebibytes, if there is an artifact.
    pub fn artifact_megabytes(&self) -> Option<f64> {
        self.artifact_bytes.map(|b| b as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(s: &str) -> SectionTitle {
        SectionTitle::new(s).unwrap()
    }

    fn planned_state(n: usize) -> RunState {
        let mut state = RunState::new(RunId::new_random(), "Topic", 10, PathBuf::from("document.md"));
        let plan = (0..n).map(|i| title(&format!("S{i}"))).collect();
        state.set_plan(plan).unwrap();
        state.advance(RunStage::Planned).unwrap();
        state
    }

    fn written(t: &str) -> SectionOutcome {
        SectionOutcome::Written {
            title: title(t),
            stats: BufferStats { words: 250, lines: 9 },
            attempts: 1,
        }
    }

    #[test]
    fn stage_graph_is_linear_with_failed_exit() {
        assert!(RunStage::Init.can_advance_to(RunStage::Planned));
        assert!(RunStage::Compiled.can_advance_to(RunStage::Finalized));
        assert!(!RunStage::Init.can_advance_to(RunStage::Sectioned));
        assert!(!RunStage::Sectioned.can_advance_to(RunStage::Planned));
        assert!(RunStage::SectioningInProgress.can_advance_to(RunStage::Failed));
        assert!(!RunStage::Finalized.can_advance_to(RunStage::Failed));
        assert!(!RunStage::Failed.can_advance_to(RunStage::Failed));
    }

    #[test]
    fn new_state_starts_in_init() {
        let state = RunState::new(RunId::new_random(), "Topic", 10, PathBuf::from("b.md"));
        assert_eq!(state.stage(), RunStage::Init);
        assert_eq!(state.cursor(), 0);
        assert!(state.plan().is_empty());
    }

    #[test]
    fn empty_plan_is_rejected() {
        let mut state = RunState::new(RunId::new_random(), "Topic", 10, PathBuf::from("b.md"));
        assert_eq!(state.set_plan(Vec::new()), Err(StateError::EmptyPlan));
        assert_eq!(state.advance(RunStage::Planned), Err(StateError::EmptyPlan));
    }

    #[test]
    fn plan_is_frozen_once_planned() {
        let mut state = planned_state(2);
        let err = state.set_plan(vec![title("Other")]).unwrap_err();
        assert!(matches!(err, StateError::PlanFrozen { .. }));
        assert_eq!(state.plan().len(), 2);
    }

    #[test]
    fn plan_cannot_be_replaced_in_init() {
        let mut state = RunState::new(RunId::new_random(), "Topic", 10, PathBuf::from("b.md"));
        state.set_plan(vec![title("A")]).unwrap();
        assert!(state.set_plan(vec![title("B")]).is_err());
    }

    #[test]
    fn cursor_advances_on_every_outcome_and_stops_at_plan_length() {
        let mut state = planned_state(2);
        state.advance(RunStage::SectioningInProgress).unwrap();
        assert_eq!(state.next_section().unwrap().as_str(), "S0");

        state.record_section(written("S0")).unwrap();
        state
            .record_section(SectionOutcome::Skipped {
                title: title("S1"),
                step: SectionStep::Write,
                reason: "too short".into(),
                attempts: 2,
            })
            .unwrap();
        assert_eq!(state.cursor(), 2);
        assert!(state.next_section().is_none());
        assert_eq!(
            state.record_section(written("extra")),
            Err(StateError::CursorExhausted { len: 2 })
        );
    }

    #[test]
    fn sectioned_requires_every_section_attempted() {
        let mut state = planned_state(3);
        state.advance(RunStage::SectioningInProgress).unwrap();
        state.record_section(written("S0")).unwrap();
        assert_eq!(
            state.advance(RunStage::Sectioned),
            Err(StateError::SectionsPending { remaining: 2 })
        );
    }

    #[test]
    fn sections_only_recorded_while_sectioning() {
        let mut state = planned_state(1);
        let err = state.record_section(written("S0")).unwrap_err();
        assert!(matches!(err, StateError::NotSectioning { .. }));
    }

    #[test]
    fn cover_is_set_at_most_once() {
        let mut state = planned_state(1);
        state.advance(RunStage::SectioningInProgress).unwrap();
        state.record_section(written("S0")).unwrap();
        state.advance(RunStage::Sectioned).unwrap();
        state.set_cover(PathBuf::from("cover.jpg")).unwrap();
        assert_eq!(
            state.set_cover(PathBuf::from("other.jpg")),
            Err(StateError::CoverAlreadyResolved)
        );
        assert_eq!(
            state.set_cover_error("late"),
            Err(StateError::CoverAlreadyResolved)
        );
        state.advance(RunStage::AssetResolved).unwrap();
        assert_eq!(state.cover_asset_path(), Some(Path::new("cover.jpg")));
    }

    #[test]
    fn compiled_and_finalized_need_their_payload() {
        let mut state = planned_state(1);
        state.advance(RunStage::SectioningInProgress).unwrap();
        state.record_section(written("S0")).unwrap();
        state.advance(RunStage::Sectioned).unwrap();
        state.advance(RunStage::AssetResolved).unwrap();
        assert_eq!(
            state.advance(RunStage::Compiled),
            Err(StateError::RequiresPayload {
                to: RunStage::Compiled
            })
        );
        state.set_artifact(PathBuf::from("ws/document.pdf"), 4096).unwrap();
        state.finalize(PathBuf::from("out/Topic.pdf"), 4096).unwrap();

        let summary = state.summary();
        assert!(summary.succeeded());
        assert_eq!(summary.sections_written, 1);
        assert_eq!(summary.sections_skipped(), 0);
        assert_eq!(summary.artifact_path, Some(PathBuf::from("out/Topic.pdf")));
        assert_eq!(summary.artifact_bytes, Some(4096));
    }

    #[test]
    fn fail_records_reason_and_is_terminal() {
        let mut state = planned_state(1);
        state.fail(FailureKind::Cancelled, "stop requested").unwrap();
        assert_eq!(state.stage(), RunStage::Failed);
        assert_eq!(state.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(state.failure_reason(), Some("stop requested"));
        assert!(state.fail(FailureKind::Plan, "again").is_err());
        assert!(state.advance(RunStage::SectioningInProgress).is_err());
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = planned_state(2);
        state.advance(RunStage::SectioningInProgress).unwrap();
        state.record_section(written("S0")).unwrap();
        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(json.contains("\"stage\": \"sectioning_in_progress\""));
        assert!(json.contains("\"outcome\": \"written\""));
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn summary_reports_megabytes() {
        let mut summary = planned_state(1).summary();
        assert_eq!(summary.artifact_megabytes(), None);
        summary.artifact_bytes = Some(2 * 1024 * 1024);
        assert_eq!(summary.artifact_megabytes(), Some(2.0));
    }
}
