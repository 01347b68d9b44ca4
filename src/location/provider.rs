use futures::future::{self, BoxFuture};

use super::{Coordinates, DetectOptions};

/// Failure codes a platform geolocation service can report. The host provider
/// only ever reports `PositionUnavailable`.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

/// Platform capability yielding a single coordinate pair.
pub trait GeolocationProvider: Send + Sync {
    fn is_supported(&self) -> bool;

    fn current_position(
        &self,
        options: &DetectOptions,
    ) -> BoxFuture<'static, Result<Coordinates, PlatformError>>;
}

/// Host-side provider: answers with a configured fix, or reports itself
/// unsupported when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProvider {
    coordinates: Option<Coordinates>,
}

impl FixedProvider {
    pub fn new(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

impl GeolocationProvider for FixedProvider {
    fn is_supported(&self) -> bool {
        self.coordinates.is_some()
    }

    fn current_position(
        &self,
        _options: &DetectOptions,
    ) -> BoxFuture<'static, Result<Coordinates, PlatformError>> {
        let outcome = self.coordinates.ok_or(PlatformError::PositionUnavailable);
        Box::pin(future::ready(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_provider_reports_support_from_configuration() {
        let unset = FixedProvider::default();
        assert!(!unset.is_supported());

        let here = Coordinates::new(10.0, 20.0).unwrap();
        let set = FixedProvider::new(Some(here));
        assert!(set.is_supported());
        assert_eq!(
            set.current_position(&DetectOptions::default()).await,
            Ok(here)
        );
    }
}
