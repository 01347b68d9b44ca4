mod provider;

pub use provider::{FixedProvider, GeolocationProvider, PlatformError};

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::utils::random_index;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_CACHE_AGE_MS: u64 = 10_000;

/// Labels handed out by the mock reverse geocoder.
pub const MOCK_LABELS: &[&str] = &[
    "North Rice Field",
    "Eastern Plantation",
    "Western Farm Area",
    "Southern Cropland",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Validates a manually entered pair.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }

    pub fn describe(&self) -> String {
        format!("Latitude: {:.6}, Longitude: {:.6}", self.lat, self.lng)
    }
}

/// A detected or manually entered location. Never persisted beyond the
/// submission it is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationFix {
    Coordinates { lat: f64, lng: f64 },
    Label { label: String },
}

impl LocationFix {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            LocationFix::Coordinates { lat, lng } => Some(Coordinates {
                lat: *lat,
                lng: *lng,
            }),
            LocationFix::Label { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LocationFix::Coordinates { lat, lng } => Coordinates {
                lat: *lat,
                lng: *lng,
            }
            .describe(),
            LocationFix::Label { label } => label.clone(),
        }
    }
}

impl From<Coordinates> for LocationFix {
    fn from(value: Coordinates) -> Self {
        LocationFix::Coordinates {
            lat: value.lat,
            lng: value.lng,
        }
    }
}

/// Options passed through to the platform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectOptions {
    pub enable_high_accuracy: bool,
    pub timeout_ms: u64,
    pub max_cache_age_ms: u64,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_cache_age_ms: DEFAULT_MAX_CACHE_AGE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeolocationError {
    Unsupported,
    PermissionDenied,
    Timeout,
    PositionUnavailable,
    AlreadyInProgress,
    Cancelled,
}

impl GeolocationError {
    pub fn code(&self) -> &'static str {
        match self {
            GeolocationError::Unsupported => "unsupported",
            GeolocationError::PermissionDenied => "permission_denied",
            GeolocationError::Timeout => "timeout",
            GeolocationError::PositionUnavailable => "position_unavailable",
            GeolocationError::AlreadyInProgress => "already_in_progress",
            GeolocationError::Cancelled => "cancelled",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            GeolocationError::Unsupported => "Geolocation is not supported by your browser",
            GeolocationError::PermissionDenied => {
                "Location access was denied. Please allow location access or enter your location manually."
            }
            GeolocationError::Timeout => {
                "Location detection timed out. Please try again or enter your location manually."
            }
            GeolocationError::PositionUnavailable => {
                "Unable to retrieve your location. Please enter your location manually."
            }
            GeolocationError::AlreadyInProgress => "Location detection is already in progress",
            GeolocationError::Cancelled => "Location detection was cancelled",
        }
    }
}

impl From<PlatformError> for GeolocationError {
    fn from(value: PlatformError) -> Self {
        match value {
            PlatformError::PermissionDenied => GeolocationError::PermissionDenied,
            PlatformError::PositionUnavailable => GeolocationError::PositionUnavailable,
            PlatformError::Timeout => GeolocationError::Timeout,
        }
    }
}

impl std::fmt::Display for GeolocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GeolocationError {}

/// Turns coordinates into a human label for the textual location mode.
pub trait LocationLabeler: Send + Sync {
    fn label(&self, coordinates: &Coordinates) -> String;
}

/// Stand-in for a geocoding service: picks one of [`MOCK_LABELS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MockLabeler;

impl LocationLabeler for MockLabeler {
    fn label(&self, _coordinates: &Coordinates) -> String {
        MOCK_LABELS[random_index(MOCK_LABELS.len())].to_string()
    }
}

/// Bounded single-shot location detection. At most one request per detector
/// may be outstanding.
#[derive(Clone)]
pub struct LocationDetector {
    provider: Arc<dyn GeolocationProvider>,
    options: DetectOptions,
    in_flight: Arc<AtomicBool>,
}

impl LocationDetector {
    pub fn new(provider: Arc<dyn GeolocationProvider>, options: DetectOptions) -> Self {
        Self {
            provider,
            options,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn is_detecting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Resolves with a coordinate fix or a typed failure within the
    /// configured timeout. Dropping the returned future releases the slot.
    pub async fn detect(&self) -> Result<LocationFix, GeolocationError> {
        if !self.provider.is_supported() {
            warn!("geolocation requested but the provider is unsupported");
            return Err(GeolocationError::Unsupported);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GeolocationError::AlreadyInProgress);
        }
        let _slot = InFlightSlot(self.in_flight.clone());

        debug!(options = ?self.options, "detecting location");
        let request = self.provider.current_position(&self.options);
        let outcome = match timeout(Duration::from_millis(self.options.timeout_ms), request).await {
            Err(_) => Err(GeolocationError::Timeout),
            Ok(Err(err)) => Err(GeolocationError::from(err)),
            Ok(Ok(coordinates)) => Ok(LocationFix::from(coordinates)),
        };

        match &outcome {
            Ok(_) => info!("location detected"),
            Err(err) => warn!(error = err.code(), "location detection failed"),
        }
        outcome
    }

    /// Detects, then converts the fix into a textual label.
    pub async fn detect_label(
        &self,
        labeler: &dyn LocationLabeler,
    ) -> Result<LocationFix, GeolocationError> {
        let fix = self.detect().await?;
        let label = match fix.coordinates() {
            Some(coordinates) => labeler.label(&coordinates),
            None => return Ok(fix),
        };
        Ok(LocationFix::Label { label })
    }

    /// Runs detection in the background. The returned handle cancels the
    /// request when told to or when dropped.
    pub fn start(&self) -> DetectionHandle {
        let detector = self.clone();
        DetectionHandle {
            task: Some(tokio::spawn(async move { detector.detect().await })),
        }
    }
}

struct InFlightSlot(Arc<AtomicBool>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Disposable handle to a background detection.
pub struct DetectionHandle {
    task: Option<JoinHandle<Result<LocationFix, GeolocationError>>>,
}

impl DetectionHandle {
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub async fn outcome(mut self) -> Result<LocationFix, GeolocationError> {
        let Some(task) = self.task.take() else {
            return Err(GeolocationError::Cancelled);
        };
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(GeolocationError::Cancelled),
            Err(err) => {
                warn!(?err, "location task panicked");
                Err(GeolocationError::PositionUnavailable)
            }
        }
    }
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::{self, BoxFuture, FutureExt};

    enum Script {
        Fix(Coordinates),
        Fail(PlatformError),
        Hang,
        After(u64, Coordinates),
    }

    struct ScriptedProvider {
        supported: bool,
        script: Script,
    }

    impl GeolocationProvider for ScriptedProvider {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn current_position(
            &self,
            _options: &DetectOptions,
        ) -> BoxFuture<'static, Result<Coordinates, PlatformError>> {
            match &self.script {
                Script::Fix(c) => future::ready(Ok(*c)).boxed(),
                Script::Fail(e) => future::ready(Err(*e)).boxed(),
                Script::Hang => future::pending().boxed(),
                Script::After(ms, c) => {
                    let (ms, c) = (*ms, *c);
                    async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(c)
                    }
                    .boxed()
                }
            }
        }
    }

    fn detector(supported: bool, script: Script) -> LocationDetector {
        LocationDetector::new(
            Arc::new(ScriptedProvider { supported, script }),
            DetectOptions::default(),
        )
    }

    fn field() -> Coordinates {
        Coordinates::new(14.5995, 120.9842).unwrap()
    }

    #[tokio::test]
    async fn success_yields_coordinates() {
        let fix = detector(true, Script::Fix(field())).detect().await.unwrap();
        assert_eq!(fix.coordinates(), Some(field()));
        assert_eq!(fix.describe(), "Latitude: 14.599500, Longitude: 120.984200");
    }

    #[tokio::test]
    async fn unsupported_runtime_is_reported() {
        let err = detector(false, Script::Fix(field())).detect().await.unwrap_err();
        assert_eq!(err, GeolocationError::Unsupported);
    }

    #[tokio::test]
    async fn platform_errors_map_one_to_one() {
        for (platform, expected) in [
            (PlatformError::PermissionDenied, GeolocationError::PermissionDenied),
            (PlatformError::PositionUnavailable, GeolocationError::PositionUnavailable),
            (PlatformError::Timeout, GeolocationError::Timeout),
        ] {
            let err = detector(true, Script::Fail(platform)).detect().await.unwrap_err();
            assert_eq!(err, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out_at_the_configured_bound() {
        let detector = detector(true, Script::Hang);
        let started = tokio::time::Instant::now();

        let err = detector.detect().await.unwrap_err();

        assert_eq!(err, GeolocationError::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(!detector.is_detecting());
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_while_pending_is_rejected() {
        let detector = detector(true, Script::After(500, field()));
        let handle = detector.start();
        tokio::task::yield_now().await;
        assert!(detector.is_detecting());

        assert_eq!(
            detector.detect().await.unwrap_err(),
            GeolocationError::AlreadyInProgress
        );

        assert_eq!(handle.outcome().await.unwrap().coordinates(), Some(field()));
        assert!(detector.detect().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_releases_the_slot() {
        let detector = detector(true, Script::Hang);
        let handle = detector.start();
        tokio::task::yield_now().await;
        assert!(detector.is_detecting());

        handle.cancel();
        assert_eq!(handle.outcome().await.unwrap_err(), GeolocationError::Cancelled);
        assert!(!detector.is_detecting());
    }

    #[tokio::test]
    async fn label_mode_uses_a_known_label() {
        let fix = detector(true, Script::Fix(field()))
            .detect_label(&MockLabeler)
            .await
            .unwrap();
        match fix {
            LocationFix::Label { label } => assert!(MOCK_LABELS.contains(&label.as_str())),
            other => panic!("expected a label, got {other:?}"),
        }
    }

    #[test]
    fn manual_coordinates_are_range_checked() {
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, -181.0).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
        assert!(Coordinates::new(-90.0, 180.0).is_some());
    }
}
