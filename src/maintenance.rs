use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::web::AppState;

pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 60 * 60;

/// Periodically drops finished uploads so their image bytes and previews do
/// not accumulate for the life of the process.
pub fn spawn(state: AppState) {
    let interval = state.settings().cleanup_interval;
    let retention = state.settings().job_retention;
    tokio::spawn(async move {
        loop {
            run_cleanup_cycle(&state, retention);
            sleep(interval).await;
        }
    });
}

fn run_cleanup_cycle(state: &AppState, retention: Duration) -> usize {
    let evicted = state.evict_settled_jobs(retention);
    if evicted > 0 {
        info!(evicted, remaining = state.job_count(), "upload retention cleanup completed");
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        pipeline::{ArtifactInput, PipelineState, PipelineVariant, UploadLocation},
        session::MemoryStore,
    };

    fn settings() -> Settings {
        Settings {
            cleanup_interval: Duration::from_secs(60),
            job_retention: Duration::from_secs(600),
            ..Settings::default()
        }
    }

    async fn finished_job(state: &AppState) -> uuid::Uuid {
        let (job_id, job) = state.create_job(PipelineVariant::UploadOnly);
        job.pipeline
            .select(ArtifactInput::new(
                "leaf.png".to_string(),
                "image/png".to_string(),
                vec![1; 1024],
            ))
            .await
            .unwrap();
        job.pipeline
            .set_location(Some(UploadLocation::Text("Field A".to_string())))
            .unwrap();
        job.pipeline.submit().unwrap().wait().await.unwrap();
        job_id
    }

    #[tokio::test(start_paused = true)]
    async fn settled_jobs_are_kept_until_retention_elapses() {
        let state = AppState::with_session_store(settings(), MemoryStore::shared());
        let job_id = finished_job(&state).await;
        let job = state.job(job_id).unwrap();

        assert_eq!(run_cleanup_cycle(&state, Duration::from_secs(600)), 0);
        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(run_cleanup_cycle(&state, Duration::from_secs(600)), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(run_cleanup_cycle(&state, Duration::from_secs(600)), 1);
        assert!(state.job(job_id).is_none());
        assert!(job.pipeline.is_torn_down());
    }

    #[tokio::test(start_paused = true)]
    async fn running_and_unsubmitted_jobs_survive() {
        let state = AppState::with_session_store(settings(), MemoryStore::shared());
        let (idle_id, _) = state.create_job(PipelineVariant::UploadOnly);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(run_cleanup_cycle(&state, Duration::ZERO), 0);
        assert_eq!(state.job(idle_id).unwrap().pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_empties_the_job_map() {
        let state = AppState::with_session_store(settings(), MemoryStore::shared());
        for _ in 0..5 {
            finished_job(&state).await;
        }
        assert_eq!(state.job_count(), 5);

        spawn(state.clone());
        sleep(Duration::from_secs(24 * 60 * 60)).await;

        assert_eq!(state.job_count(), 0);
    }
}
