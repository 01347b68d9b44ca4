mod analysis;
mod artifact;
mod progress;

pub use analysis::{AnalysisService, DEFAULT_ANALYSIS_DELAY_MS, SimulatedAnalysis};
pub use artifact::{ArtifactInput, MAX_ARTIFACT_BYTES, UploadArtifact};

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    location::LocationFix,
    notify::{Notice, Notifier},
    results::{AnalysisFindings, ResultStore},
    utils::prefixed_id,
};

use progress::ProgressMeter;

pub const DEFAULT_PROGRESS_TICK_MS: u64 = 300;
const EVENT_CAPACITY: usize = 64;

/// Which form the pipeline backs. Field registration also requires a field id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    UploadOnly,
    FieldRegistration,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub variant: PipelineVariant,
    pub max_artifact_bytes: u64,
    pub progress_tick: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: PipelineVariant::FieldRegistration,
            max_artifact_bytes: MAX_ARTIFACT_BYTES,
            progress_tick: Duration::from_millis(DEFAULT_PROGRESS_TICK_MS),
        }
    }
}

/// Where the image was taken: free text or a detected fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UploadLocation {
    Text(String),
    Fix(LocationFix),
}

impl UploadLocation {
    pub fn is_present(&self) -> bool {
        match self {
            UploadLocation::Text(text) => !text.trim().is_empty(),
            UploadLocation::Fix(LocationFix::Label { label }) => !label.trim().is_empty(),
            UploadLocation::Fix(LocationFix::Coordinates { .. }) => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            UploadLocation::Text(text) => text.trim().to_string(),
            UploadLocation::Fix(fix) => fix.describe(),
        }
    }
}

/// Everything handed to the analysis backend for one run.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub artifact: UploadArtifact,
    pub location: UploadLocation,
    pub field_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Validated,
    Submitting { progress: u8 },
    Completed { result_id: String },
    Failed { reason: String },
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Validated => "validated",
            PipelineState::Submitting { .. } => "submitting",
            PipelineState::Completed { .. } => "completed",
            PipelineState::Failed { .. } => "failed",
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, PipelineState::Submitting { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed { .. } | PipelineState::Failed { .. }
        )
    }

    pub fn progress(&self) -> u8 {
        match self {
            PipelineState::Submitting { progress } => *progress,
            PipelineState::Completed { .. } => 100,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress {
        run_id: Uuid,
        value: u8,
    },
    Completed {
        run_id: Uuid,
        result_id: String,
    },
    Failed {
        run_id: Uuid,
        reason: String,
        retryable: bool,
    },
}

/// Problems with the user's input. The form stays editable after any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidFileType { mime_type: String },
    FileTooLarge { size_bytes: u64, max_bytes: u64 },
    NoArtifact,
    MissingInformation { missing: Vec<&'static str> },
}

impl ValidationError {
    pub fn notice(&self) -> Notice {
        match self {
            ValidationError::InvalidFileType { .. } => {
                Notice::destructive("Invalid file type", "Please upload an image file")
            }
            ValidationError::FileTooLarge { max_bytes, .. } => Notice::destructive(
                "File too large",
                format!("Maximum file size is {}MB", max_bytes / (1024 * 1024)),
            ),
            ValidationError::NoArtifact => {
                Notice::destructive("No image selected", "Please upload an image to analyze")
            }
            ValidationError::MissingInformation { .. } => Notice::destructive(
                "Missing information",
                "Please fill in all the required fields",
            ),
        }
    }

    pub fn message(&self) -> String {
        self.notice().description
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidFileType { mime_type } => {
                write!(f, "unsupported media type `{mime_type}`")
            }
            ValidationError::FileTooLarge {
                size_bytes,
                max_bytes,
            } => write!(f, "file of {size_bytes} bytes exceeds {max_bytes} bytes"),
            ValidationError::NoArtifact => write!(f, "no image selected"),
            ValidationError::MissingInformation { missing } => {
                write!(f, "missing required fields: {}", missing.join(", "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    Validation(ValidationError),
    /// A submission is in flight; the requested change must wait.
    Busy,
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    /// A newer selection or a state change replaced this operation.
    Superseded,
    /// The simulated remote call failed. Retry re-enters `Validated`.
    AnalysisFailed(String),
    TornDown,
}

impl PipelineError {
    pub fn message(&self) -> String {
        match self {
            PipelineError::Validation(err) => err.message(),
            PipelineError::Busy => "An analysis is already in progress".to_string(),
            PipelineError::InvalidTransition { from, action } => {
                format!("Cannot {action} while the upload is {from}")
            }
            PipelineError::Superseded => "This upload was replaced by a newer one".to_string(),
            PipelineError::AnalysisFailed(_) => {
                "Something went wrong while analyzing your image. Please try again.".to_string()
            }
            PipelineError::TornDown => "This upload is no longer active".to_string(),
        }
    }
}

impl From<ValidationError> for PipelineError {
    fn from(value: ValidationError) -> Self {
        PipelineError::Validation(value)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Validation(err) => write!(f, "{err}"),
            PipelineError::AnalysisFailed(reason) => write!(f, "analysis failed: {reason}"),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Observer for one submission. Clones observe the same run.
#[derive(Debug, Clone)]
pub struct SubmissionHandle {
    run_id: Uuid,
    state: watch::Receiver<PipelineState>,
}

impl SubmissionHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Resolves with the result id once the run completes.
    #[allow(dead_code)]
    pub async fn wait(mut self) -> Result<String, PipelineError> {
        loop {
            let current = self.state.borrow_and_update().clone();
            match current {
                PipelineState::Completed { result_id } => return Ok(result_id),
                PipelineState::Failed { reason } => {
                    return Err(PipelineError::AnalysisFailed(reason));
                }
                PipelineState::Submitting { .. } => {}
                PipelineState::Idle | PipelineState::Validated => {
                    return Err(PipelineError::Superseded);
                }
            }

            if self.state.changed().await.is_err() {
                return Err(PipelineError::TornDown);
            }
        }
    }
}

struct ActiveRun {
    id: Uuid,
    task: Option<JoinHandle<()>>,
    handle: SubmissionHandle,
}

struct Inner {
    state: PipelineState,
    artifact: Option<UploadArtifact>,
    location: Option<UploadLocation>,
    field_id: Option<String>,
    selection: u64,
    run: Option<ActiveRun>,
    torn_down: bool,
    state_tx: Option<watch::Sender<PipelineState>>,
    events_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl Inner {
    fn set_state(&mut self, next: PipelineState) {
        self.state = next.clone();
        if let Some(tx) = &self.state_tx {
            tx.send_replace(next);
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events_tx {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.torn_down {
            return Err(PipelineError::TornDown);
        }
        if self.state.is_submitting() {
            return Err(PipelineError::Busy);
        }
        Ok(())
    }
}

struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` only if the pipeline is alive and `run_id` is still the
    /// active run. Late callbacks from a cancelled run are dropped here.
    fn apply<R>(&self, run_id: Uuid, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        let current = inner.run.as_ref().map(|run| run.id);
        if inner.torn_down || current != Some(run_id) || !inner.state.is_submitting() {
            return None;
        }
        Some(f(&mut inner))
    }
}

/// Client-side upload and analysis state machine:
/// `Idle -> Validated -> Submitting -> Completed | Failed`.
///
/// One instance backs one upload form. Dropping it (or calling
/// [`UploadPipeline::shutdown`]) cancels any in-flight run; no completion or
/// failure is delivered afterwards.
pub struct UploadPipeline {
    id: Uuid,
    config: PipelineConfig,
    shared: Arc<Shared>,
    analysis: Arc<dyn AnalysisService>,
    results: Arc<ResultStore>,
    notifier: Arc<dyn Notifier>,
}

impl UploadPipeline {
    pub fn new(
        config: PipelineConfig,
        analysis: Arc<dyn AnalysisService>,
        results: Arc<ResultStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            id: Uuid::new_v4(),
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PipelineState::Idle,
                    artifact: None,
                    location: None,
                    field_id: None,
                    selection: 0,
                    run: None,
                    torn_down: false,
                    state_tx: Some(state_tx),
                    events_tx: Some(events_tx),
                }),
            }),
            analysis,
            results,
            notifier,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn variant(&self) -> PipelineVariant {
        self.config.variant
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lock().state.clone()
    }

    pub fn artifact(&self) -> Option<UploadArtifact> {
        self.shared.lock().artifact.clone()
    }

    pub fn location(&self) -> Option<UploadLocation> {
        self.shared.lock().location.clone()
    }

    pub fn field_id(&self) -> Option<String> {
        self.shared.lock().field_id.clone()
    }

    #[cfg(test)]
    pub fn is_torn_down(&self) -> bool {
        self.shared.lock().torn_down
    }

    /// Progress and terminal events for every run of this pipeline.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        match &self.shared.lock().events_tx {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Validates `input` and, once its preview is ready, makes it the
    /// pipeline's artifact. A rejected file leaves the current state alone.
    pub async fn select(&self, input: ArtifactInput) -> Result<(), PipelineError> {
        let (checked, ticket) = {
            let mut inner = self.shared.lock();
            inner.ensure_live()?;

            match artifact::check(input, self.config.max_artifact_bytes) {
                Ok(checked) => {
                    inner.selection += 1;
                    inner.artifact = None;
                    inner.set_state(PipelineState::Idle);
                    (checked, inner.selection)
                }
                Err(err) => {
                    debug!(pipeline_id = %self.id, %err, "artifact rejected");
                    self.notifier.notify(err.notice());
                    return Err(err.into());
                }
            }
        };

        let artifact = artifact::materialize(checked).await;

        let mut inner = self.shared.lock();
        if inner.torn_down {
            return Err(PipelineError::TornDown);
        }
        if inner.selection != ticket || inner.state.is_submitting() {
            return Err(PipelineError::Superseded);
        }

        info!(
            pipeline_id = %self.id,
            file = %artifact.file_name,
            size_bytes = artifact.size_bytes,
            "artifact validated"
        );
        inner.artifact = Some(artifact);
        inner.set_state(PipelineState::Validated);
        Ok(())
    }

    /// Drops the artifact and returns to `Idle`. Pending previews are discarded.
    pub fn clear(&self) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        inner.ensure_live()?;
        inner.selection += 1;
        inner.artifact = None;
        inner.run = None;
        inner.set_state(PipelineState::Idle);
        Ok(())
    }

    pub fn set_location(&self, location: Option<UploadLocation>) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        inner.ensure_live()?;
        inner.location = location;
        Ok(())
    }

    pub fn set_field_id(&self, field_id: Option<String>) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        inner.ensure_live()?;
        inner.field_id = field_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(())
    }

    /// Starts the simulated remote analysis.
    ///
    /// While a run is in flight this returns the existing handle instead of
    /// starting another. Must be called from within a Tokio runtime.
    pub fn submit(&self) -> Result<SubmissionHandle, PipelineError> {
        let mut inner = self.shared.lock();
        if inner.torn_down {
            return Err(PipelineError::TornDown);
        }

        if inner.state.is_submitting() {
            if let Some(run) = &inner.run {
                debug!(pipeline_id = %self.id, run_id = %run.id, "submit while in flight, reusing run");
                return Ok(run.handle.clone());
            }
        }

        let Some(artifact) = inner.artifact.clone() else {
            return Err(self.refuse(ValidationError::NoArtifact));
        };

        if inner.state != PipelineState::Validated {
            return Err(PipelineError::InvalidTransition {
                from: inner.state.as_str(),
                action: "submit",
            });
        }

        let mut missing = Vec::new();
        let location = inner
            .location
            .clone()
            .filter(|location| location.is_present());
        if location.is_none() {
            missing.push("location");
        }
        if self.config.variant == PipelineVariant::FieldRegistration && inner.field_id.is_none() {
            missing.push("field_id");
        }
        let Some(location) = location.filter(|_| missing.is_empty()) else {
            return Err(self.refuse(ValidationError::MissingInformation { missing }));
        };

        let Some(state_rx) = inner.state_tx.as_ref().map(|tx| tx.subscribe()) else {
            return Err(PipelineError::TornDown);
        };

        let run_id = Uuid::new_v4();
        let request = UploadRequest {
            artifact,
            location,
            field_id: inner.field_id.clone(),
        };
        inner.set_state(PipelineState::Submitting { progress: 0 });
        let handle = SubmissionHandle {
            run_id,
            state: state_rx,
        };

        let run = RunContext {
            pipeline_id: self.id,
            run_id,
            shared: self.shared.clone(),
            results: self.results.clone(),
            notifier: self.notifier.clone(),
            tick: self.config.progress_tick,
        };
        let analysis = self.analysis.analyze(request.clone());
        let task = tokio::spawn(run.drive(analysis, request.location.describe()));

        info!(pipeline_id = %self.id, %run_id, "submission started");
        inner.run = Some(ActiveRun {
            id: run_id,
            task: Some(task),
            handle: handle.clone(),
        });

        Ok(handle)
    }

    /// Leaves `Failed` for `Validated`, keeping the artifact and metadata.
    pub fn retry(&self) -> Result<(), PipelineError> {
        let mut inner = self.shared.lock();
        if inner.torn_down {
            return Err(PipelineError::TornDown);
        }
        if !matches!(inner.state, PipelineState::Failed { .. }) {
            return Err(PipelineError::InvalidTransition {
                from: inner.state.as_str(),
                action: "retry",
            });
        }
        if inner.artifact.is_none() {
            return Err(ValidationError::NoArtifact.into());
        }

        inner.run = None;
        inner.set_state(PipelineState::Validated);
        info!(pipeline_id = %self.id, "pipeline re-entered validated state for retry");
        Ok(())
    }

    /// Cancels any in-flight run and closes all observers. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        if inner.torn_down {
            return;
        }
        inner.torn_down = true;

        if let Some(task) = inner.run.as_mut().and_then(|run| run.task.take()) {
            task.abort();
            debug!(pipeline_id = %self.id, "in-flight run cancelled");
        }
        inner.state_tx = None;
        inner.events_tx = None;
        info!(pipeline_id = %self.id, "pipeline torn down");
    }

    fn refuse(&self, err: ValidationError) -> PipelineError {
        warn!(pipeline_id = %self.id, %err, "submission refused");
        self.notifier.notify(err.notice());
        err.into()
    }
}

impl Drop for UploadPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RunContext {
    pipeline_id: Uuid,
    run_id: Uuid,
    shared: Arc<Shared>,
    results: Arc<ResultStore>,
    notifier: Arc<dyn Notifier>,
    tick: Duration,
}

impl RunContext {
    async fn drive(
        self,
        mut analysis: BoxFuture<'static, Result<AnalysisFindings, String>>,
        location: String,
    ) {
        let run_id = self.run_id;
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meter = ProgressMeter::new();

        let outcome = loop {
            tokio::select! {
                outcome = &mut analysis => break outcome,
                _ = ticker.tick() => {
                    let Some(value) = meter.tick() else { continue };
                    let applied = self.shared.apply(run_id, |inner| {
                        inner.set_state(PipelineState::Submitting { progress: value });
                        inner.emit(PipelineEvent::Progress { run_id, value });
                    });
                    if applied.is_none() {
                        return;
                    }
                }
            }
        };

        match outcome {
            Ok(findings) => {
                let result_id = prefixed_id("analysis");
                let result =
                    findings.into_result(result_id.clone(), Utc::now().date_naive(), location);
                let results = self.results.clone();

                let completed = self.shared.apply(run_id, |inner| {
                    // Registration and the state change happen under one lock
                    // so the id is never observable without its record.
                    results.publish(result);
                    if let Some(value) = meter.finish() {
                        inner.set_state(PipelineState::Submitting { progress: value });
                        inner.emit(PipelineEvent::Progress { run_id, value });
                    }
                    inner.set_state(PipelineState::Completed {
                        result_id: result_id.clone(),
                    });
                    inner.emit(PipelineEvent::Completed {
                        run_id,
                        result_id: result_id.clone(),
                    });
                    if let Some(run) = inner.run.as_mut() {
                        run.task = None;
                    }
                });

                if completed.is_some() {
                    info!(pipeline_id = %self.pipeline_id, %run_id, %result_id, "analysis complete");
                    self.notifier.notify(Notice::info(
                        "Analysis complete",
                        "Your rice crop has been successfully analyzed",
                    ));
                }
            }
            Err(reason) => {
                let failed = self.shared.apply(run_id, |inner| {
                    inner.set_state(PipelineState::Failed {
                        reason: reason.clone(),
                    });
                    inner.emit(PipelineEvent::Failed {
                        run_id,
                        reason: reason.clone(),
                        retryable: true,
                    });
                    if let Some(run) = inner.run.as_mut() {
                        run.task = None;
                    }
                });

                if failed.is_some() {
                    warn!(pipeline_id = %self.pipeline_id, %run_id, %reason, "analysis failed");
                    self.notifier.notify(Notice::destructive(
                        "Upload failed",
                        "Something went wrong while analyzing your image. Please try again.",
                    ));
                }
            }
        }
    }
}
