//! `PipelineExecutor` drives one topic from `Init` to `Finalized` or `Failed`.
//!
//! | Stage entered | Work done before entering it | On failure |
//! |---------------|------------------------------|------------|
//! | `Planned` | outline call, plan parsing | fatal (`PlanError`) |
//! | `SectioningInProgress` | buffer initialised with the topic title | fatal (`BufferError`) |
//! | `Sectioned` | research → write for every plan entry | per section, recorded and skipped |
//! | `AssetResolved` | one cover resolution attempt | recorded, no cover |
//! | `Compiled` | render + artifact validation | fatal (`CompileError`) |
//! | `Finalized` | move to the output dir + validation | fatal (`FinalizeError`) |
//!
//! Cancellation is observed at every stage boundary and between sections.
//! `run.json` in the run workspace is rewritten after every transition.

use std::path::PathBuf;
use std::sync::Arc;

use pipeline::{
    parse_section_plan, DocumentRenderer, ImageSource, OutlineGenerator, PlanError, RetryPolicy,
    RunError, RunId, RunStage, RunState, RunSummary, Researcher, SectionOutcome, SectionTitle,
    SectionWriter, TopicSlug,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::compile::finalize_artifact;
use crate::{
    Compiler, CoverAssetResolver, DocumentBuffer, Gateway, PipelineSettings, RateLimiter,
    RunWorkspace, SectionProcessor,
};

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub outline: Arc<dyn OutlineGenerator>,
    pub researcher: Arc<dyn Researcher>,
    pub writer: Arc<dyn SectionWriter>,
    /// `None` disables cover resolution.
    pub images: Option<Arc<dyn ImageSource>>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

/// Where runs keep their scratch files and deliver their artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub work_root: PathBuf,
    pub output_dir: PathBuf,
}

pub struct PipelineExecutor {
    settings: PipelineSettings,
    paths: OutputPaths,
    gateway: Gateway,
    outline: Arc<dyn OutlineGenerator>,
    sections: SectionProcessor,
    cover: Option<CoverAssetResolver>,
    compiler: Compiler,
}

impl PipelineExecutor {
    /// Builds an executor with its own rate limiter sized from `settings`.
    pub fn new(collaborators: Collaborators, settings: PipelineSettings, paths: OutputPaths) -> Self {
        let limiter = Arc::new(RateLimiter::per_minute(settings.rate_budget()));
        Self::with_limiter(collaborators, settings, paths, limiter)
    }

    /// Builds an executor that shares `limiter` with other callers.
    pub fn with_limiter(
        collaborators: Collaborators,
        settings: PipelineSettings,
        paths: OutputPaths,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let gateway = Gateway::new(limiter, settings.call_timeout());
        let sections = SectionProcessor::new(
            gateway.clone(),
            collaborators.researcher,
            collaborators.writer,
            &settings,
        );
        let cover = collaborators
            .images
            .map(|images| CoverAssetResolver::new(gateway.clone(), images, settings.cover_attempts));
        let compiler = Compiler::new(
            gateway.clone(),
            collaborators.renderer,
            settings.min_artifact_bytes,
        );
        Self {
            outline: collaborators.outline,
            settings,
            paths,
            gateway,
            sections,
            cover,
            compiler,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.gateway.limiter()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs `topic` to a terminal stage and reports the outcome.
    pub async fn run(&self, topic: &str, cancel: &CancellationToken) -> RunSummary {
        let topic = topic.trim();
        let run_id = RunId::new_random();
        let slug = TopicSlug::from_topic(topic);
        let workspace = RunWorkspace::new(&self.paths.work_root, &slug, run_id);
        let mut state = RunState::new(run_id, topic, self.settings.rate_limit, workspace.buffer_path());

        let span = tracing::info_span!("run", run_id = %run_id, topic = %topic);
        async {
            tracing::info!(workspace = %workspace.dir().display(), "Run started");
            if let Err(err) = self.drive(&mut state, &workspace, &slug, cancel).await {
                let kind = err.failure_kind();
                if err.is_cancellation() {
                    tracing::warn!(stage = %state.stage(), "Run cancelled");
                } else {
                    tracing::error!(stage = %state.stage(), kind = %kind, error = %err, "Run failed");
                }
                if let Err(state_err) = state.fail(kind, err.to_string()) {
                    tracing::error!(error = %state_err, "Could not record run failure");
                }
                workspace.persist(&state).await;
            }

            let summary = state.summary();
            tracing::info!(
                stage = %summary.stage,
                sections_written = summary.sections_written,
                sections_skipped = summary.sections_skipped(),
                words = summary.document.words,
                lines = summary.document.lines,
                artifact_bytes = summary.artifact_bytes.unwrap_or(0),
                elapsed_ms = summary.elapsed_ms,
                "Run finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        state: &mut RunState,
        workspace: &RunWorkspace,
        slug: &TopicSlug,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        workspace
            .prepare()
            .await
            .map_err(|source| RunError::Workspace {
                path: workspace.dir().to_path_buf(),
                source,
            })?;
        workspace.persist(state).await;
        check_cancelled(state, cancel)?;

        // -- Plan -------------------------------------------------------------
        let topic = state.topic().to_string();
        let outline = self
            .gateway
            .call("outline", self.outline.generate_outline(&topic))
            .await
            .map_err(PlanError::Outline)?;
        if let Err(e) = workspace.save_outline(&outline).await {
            tracing::warn!(error = %e, "Failed to save outline");
        }
        let plan = parse_section_plan(&outline, &self.settings.plan_policy());
        if plan.is_empty() {
            return Err(PlanError::EmptyPlan.into());
        }
        tracing::info!(
            sections = plan.len(),
            plan = ?plan.iter().map(SectionTitle::as_str).collect::<Vec<_>>(),
            "Section plan ready"
        );
        state.set_plan(plan)?;
        self.enter(state, workspace, RunStage::Planned).await?;
        check_cancelled(state, cancel)?;

        // -- Buffer -----------------------------------------------------------
        let mut buffer = DocumentBuffer::initialize(state.buffer_path(), &topic).await?;
        state.set_document_stats(buffer.cached_stats());
        self.enter(state, workspace, RunStage::SectioningInProgress).await?;

        // -- Sections ---------------------------------------------------------
        let total = state.plan().len();
        while let Some(section) = state.next_section().cloned() {
            check_cancelled(state, cancel)?;
            let index = state.cursor() + 1;
            let span = tracing::info_span!("section", index, total, title = %section);
            let outcome = self
                .process_section(&topic, &section, &mut buffer, cancel)
                .instrument(span)
                .await;
            state.set_document_stats(buffer.cached_stats());
            state.record_section(outcome)?;
            workspace.persist(state).await;
        }
        self.enter(state, workspace, RunStage::Sectioned).await?;
        check_cancelled(state, cancel)?;

        // -- Cover ------------------------------------------------------------
        match &self.cover {
            Some(resolver) => match resolver.resolve(&topic, workspace.dir()).await {
                Ok(path) => state.set_cover(path)?,
                Err(e) => {
                    tracing::warn!(error = %e, "No cover image; continuing without one");
                    state.set_cover_error(e.to_string())?;
                }
            },
            None => tracing::info!("Cover resolution disabled"),
        }
        self.enter(state, workspace, RunStage::AssetResolved).await?;
        check_cancelled(state, cancel)?;

        // -- Compile ----------------------------------------------------------
        let artifact = self
            .compiler
            .compile(&buffer, state.cover_asset_path(), workspace.dir())
            .await?;
        state.set_artifact(artifact.path.clone(), artifact.bytes)?;
        tracing::info!(stage = %RunStage::Compiled, "Stage transition");
        workspace.persist(state).await;
        check_cancelled(state, cancel)?;

        // -- Finalize ---------------------------------------------------------
        let destination = self
            .paths
            .output_dir
            .join(format!("{slug}.{}", self.compiler.artifact_extension()));
        let bytes = finalize_artifact(&artifact.path, &destination, self.compiler.min_artifact_bytes())
            .await?;
        tracing::info!(path = %destination.display(), bytes, "Artifact delivered");
        state.finalize(destination, bytes)?;
        tracing::info!(stage = %RunStage::Finalized, "Stage transition");
        workspace.persist(state).await;
        Ok(())
    }

    /// Runs one section with the retry policy and turns the result into an outcome.
    async fn process_section(
        &self,
        topic: &str,
        section: &SectionTitle,
        buffer: &mut DocumentBuffer,
        cancel: &CancellationToken,
    ) -> SectionOutcome {
        let max_attempts = self.settings.section_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.sections.process(topic, section, buffer).await {
                Ok(report) => {
                    tracing::info!(
                        attempt,
                        words = report.added.words,
                        lines = report.added.lines,
                        total_words = report.total.words,
                        total_lines = report.total.lines,
                        "Section written"
                    );
                    return SectionOutcome::Written {
                        title: section.clone(),
                        stats: report.added,
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let retry_after = match err.retry_policy() {
                RetryPolicy::Retryable { after } if attempt < max_attempts => after,
                _ => {
                    tracing::warn!(attempts = attempt, step = %err.step, error = %err, "Section skipped");
                    return SectionOutcome::Skipped {
                        title: section.clone(),
                        step: err.step,
                        reason: err.failure.to_string(),
                        attempts: attempt,
                    };
                }
            };

            let delay = retry_after
                .unwrap_or_default()
                .min(self.settings.retry_backoff_cap());
            tracing::warn!(
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Section attempt failed; retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return SectionOutcome::Skipped {
                        title: section.clone(),
                        step: err.step,
                        reason: format!("{} (cancelled before retry)", err.failure),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn enter(
        &self,
        state: &mut RunState,
        workspace: &RunWorkspace,
        stage: RunStage,
    ) -> Result<(), RunError> {
        state.advance(stage)?;
        tracing::info!(stage = %stage, "Stage transition");
        workspace.persist(state).await;
        Ok(())
    }
}

fn check_cancelled(state: &RunState, cancel: &CancellationToken) -> Result<(), RunError> {
    if cancel.is_cancelled() {
        Err(RunError::Cancelled {
            stage: state.stage(),
        })
    } else {
        Ok(())
    }
}
