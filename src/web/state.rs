use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    admin::AdminAuthGate,
    appointments::AppointmentBook,
    auth::{AuthCore, MockAuthBackend},
    config::Settings,
    farmers::FarmerDirectory,
    location::{FixedProvider, LocationDetector},
    notify::{Notifier, RecordingNotifier},
    pipeline::{
        AnalysisService, PipelineConfig, PipelineVariant, SimulatedAnalysis, UploadPipeline,
    },
    results::ResultStore,
    routes::RouteAccess,
    session::{FileStore, MemoryStore, SharedStore},
};

/// One upload form instance plus the notices it has raised since the last
/// status poll.
#[derive(Clone)]
pub struct UploadJob {
    pub pipeline: Arc<UploadPipeline>,
    pub notices: RecordingNotifier,
    settled_at: Arc<Mutex<Option<Instant>>>,
}

impl UploadJob {
    /// When the job was first observed completed or failed. A retry clears
    /// the stamp.
    fn settled_since(&self, now: Instant) -> Option<Instant> {
        let mut settled_at = self
            .settled_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.pipeline.state().is_terminal() {
            *settled_at = None;
            return None;
        }
        Some(*settled_at.get_or_insert(now))
    }
}

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    auth: Arc<AuthCore>,
    admin: Arc<AdminAuthGate>,
    location: LocationDetector,
    results: Arc<ResultStore>,
    analysis: Arc<dyn AnalysisService>,
    farmers: Arc<FarmerDirectory>,
    appointments: Arc<AppointmentBook>,
    jobs: Arc<RwLock<HashMap<Uuid, UploadJob>>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let session = FileStore::open(&settings.session_file).with_context(|| {
            format!(
                "failed to open session store at {}",
                settings.session_file.display()
            )
        })?;
        let state = Self::with_session_store(settings, Arc::new(session));
        info!(
            state = state.auth.state().as_str(),
            "session rehydrated"
        );
        Ok(state)
    }

    /// Wires the application around an already opened session store. The
    /// admin flag always lives in a fresh ephemeral store.
    pub fn with_session_store(settings: Settings, session: SharedStore) -> Self {
        let auth = AuthCore::open(session, Arc::new(MockAuthBackend));
        let admin = AdminAuthGate::new(MemoryStore::shared());
        let location = LocationDetector::new(
            Arc::new(FixedProvider::new(settings.fixed_position)),
            settings.geolocation,
        );
        let analysis = SimulatedAnalysis::new(settings.analysis_delay);

        Self {
            settings: Arc::new(settings),
            auth: Arc::new(auth),
            admin: Arc::new(admin),
            location,
            results: Arc::new(ResultStore::seeded()),
            analysis: Arc::new(analysis),
            farmers: Arc::new(FarmerDirectory::default()),
            appointments: Arc::new(AppointmentBook::default()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replaces the analysis backend used by uploads started afterwards.
    #[cfg(test)]
    pub fn with_analysis(mut self, analysis: Arc<dyn AnalysisService>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn auth(&self) -> &AuthCore {
        &self.auth
    }

    pub fn admin(&self) -> &AdminAuthGate {
        &self.admin
    }

    pub fn location(&self) -> &LocationDetector {
        &self.location
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn farmers(&self) -> &FarmerDirectory {
        &self.farmers
    }

    pub fn appointments(&self) -> &AppointmentBook {
        &self.appointments
    }

    /// Route access evaluation reporting denials to `notifier`.
    pub fn route_access(&self, notifier: Arc<dyn Notifier>) -> RouteAccess {
        RouteAccess::new(self.auth.clone(), self.admin.clone(), notifier)
    }

    pub fn create_job(&self, variant: PipelineVariant) -> (Uuid, UploadJob) {
        let notices = RecordingNotifier::new();
        let config = PipelineConfig {
            variant,
            max_artifact_bytes: self.settings.upload_max_bytes,
            progress_tick: self.settings.progress_tick,
        };
        let pipeline = UploadPipeline::new(
            config,
            self.analysis.clone(),
            self.results.clone(),
            Arc::new(notices.clone()),
        );
        let job_id = pipeline.id();
        let job = UploadJob {
            pipeline: Arc::new(pipeline),
            notices,
            settled_at: Arc::new(Mutex::new(None)),
        };

        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job_id, job.clone());
        (job_id, job)
    }

    pub fn job(&self, job_id: Uuid) -> Option<UploadJob> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&job_id)
            .cloned()
    }

    /// Removes the job and tears its pipeline down.
    pub fn remove_job(&self, job_id: Uuid) -> Option<UploadJob> {
        let job = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&job_id)?;
        job.pipeline.shutdown();
        Some(job)
    }

    /// Tears down jobs that have sat completed or failed for at least
    /// `retention`. Returns how many were evicted.
    pub fn evict_settled_jobs(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter_map(|(job_id, job)| {
                let since = job.settled_since(now)?;
                (now.duration_since(since) >= retention).then_some(*job_id)
            })
            .collect();

        expired
            .into_iter()
            .filter(|job_id| {
                debug!(%job_id, "evicting settled upload");
                self.remove_job(*job_id).is_some()
            })
            .count()
    }

    pub fn job_count(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
