use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    results::{AnalysisFindings, seed_records},
    utils::random_index,
};

use super::UploadRequest;

pub const DEFAULT_ANALYSIS_DELAY_MS: u64 = 3_000;

/// Remote analysis seam. Production wires a real transport here; the
/// bundled implementation only waits and returns canned findings.
pub trait AnalysisService: Send + Sync {
    fn analyze(&self, request: UploadRequest) -> BoxFuture<'static, Result<AnalysisFindings, String>>;
}

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    #[cfg(test)]
    Fail(String),
}

/// Fixed-delay stand-in for the image analysis backend.
#[derive(Debug, Clone)]
pub struct SimulatedAnalysis {
    delay: Duration,
    outcome: Outcome,
}

impl SimulatedAnalysis {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            outcome: Outcome::Succeed,
        }
    }

    /// A backend that always fails after the delay.
    #[cfg(test)]
    pub fn failing(delay: Duration, reason: impl Into<String>) -> Self {
        Self {
            delay,
            outcome: Outcome::Fail(reason.into()),
        }
    }
}

impl Default for SimulatedAnalysis {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_ANALYSIS_DELAY_MS))
    }
}

impl AnalysisService for SimulatedAnalysis {
    fn analyze(&self, request: UploadRequest) -> BoxFuture<'static, Result<AnalysisFindings, String>> {
        let delay = self.delay;
        let outcome = self.outcome.clone();
        Box::pin(async move {
            debug!(
                file = %request.artifact.file_name,
                size_bytes = request.artifact.size_bytes,
                "simulating remote analysis"
            );
            sleep(delay).await;
            match outcome {
                Outcome::Succeed => {
                    let mut templates = seed_records();
                    let pick = random_index(templates.len());
                    Ok(AnalysisFindings::from(templates.swap_remove(pick)))
                }
                #[cfg(test)]
                Outcome::Fail(reason) => Err(reason),
            }
        })
    }
}
