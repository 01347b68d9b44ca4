use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::{
    location::{Coordinates, DEFAULT_MAX_CACHE_AGE_MS, DEFAULT_TIMEOUT_MS, DetectOptions},
    maintenance::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_JOB_RETENTION_SECS},
    pipeline::{DEFAULT_ANALYSIS_DELAY_MS, DEFAULT_PROGRESS_TICK_MS, MAX_ARTIFACT_BYTES},
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SESSION_FILE: &str = "storage/session.json";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub session_file: PathBuf,
    pub geolocation: DetectOptions,
    /// Fix reported by the host provider. `None` means geolocation is unsupported.
    pub fixed_position: Option<Coordinates>,
    pub upload_max_bytes: u64,
    pub analysis_delay: Duration,
    pub progress_tick: Duration,
    /// How long a completed or failed upload stays pollable.
    pub job_retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            geolocation: DetectOptions::default(),
            fixed_position: None,
            upload_max_bytes: MAX_ARTIFACT_BYTES,
            analysis_delay: Duration::from_millis(DEFAULT_ANALYSIS_DELAY_MS),
            progress_tick: Duration::from_millis(DEFAULT_PROGRESS_TICK_MS),
            job_retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup so tests need not touch
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = parse_or(read("PORT"), "PORT", DEFAULT_PORT)?;
        let session_file = read("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));

        let geolocation = DetectOptions {
            enable_high_accuracy: parse_bool(read("GEO_HIGH_ACCURACY"), "GEO_HIGH_ACCURACY", true)?,
            timeout_ms: parse_or(read("GEO_TIMEOUT_MS"), "GEO_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            max_cache_age_ms: parse_or(
                read("GEO_MAX_CACHE_AGE_MS"),
                "GEO_MAX_CACHE_AGE_MS",
                DEFAULT_MAX_CACHE_AGE_MS,
            )?,
        };

        let fixed_position = match (read("GEO_FIXED_LAT"), read("GEO_FIXED_LNG")) {
            (Some(lat), Some(lng)) => {
                let lat: f64 = lat.parse().context("GEO_FIXED_LAT must be a number")?;
                let lng: f64 = lng.parse().context("GEO_FIXED_LNG must be a number")?;
                let coordinates = Coordinates::new(lat, lng)
                    .ok_or_else(|| anyhow!("GEO_FIXED_LAT/GEO_FIXED_LNG out of range"))?;
                Some(coordinates)
            }
            (None, None) => None,
            _ => return Err(anyhow!("GEO_FIXED_LAT and GEO_FIXED_LNG must be set together")),
        };

        let upload_max_bytes =
            parse_or(read("UPLOAD_MAX_BYTES"), "UPLOAD_MAX_BYTES", MAX_ARTIFACT_BYTES)?;
        if upload_max_bytes == 0 {
            return Err(anyhow!("UPLOAD_MAX_BYTES must be greater than zero"));
        }

        let analysis_delay = Duration::from_millis(parse_or(
            read("ANALYSIS_DELAY_MS"),
            "ANALYSIS_DELAY_MS",
            DEFAULT_ANALYSIS_DELAY_MS,
        )?);
        let progress_tick_ms = parse_or(
            read("PROGRESS_TICK_MS"),
            "PROGRESS_TICK_MS",
            DEFAULT_PROGRESS_TICK_MS,
        )?;
        if progress_tick_ms == 0 {
            return Err(anyhow!("PROGRESS_TICK_MS must be greater than zero"));
        }

        let job_retention = Duration::from_secs(parse_or(
            read("JOB_RETENTION_SECS"),
            "JOB_RETENTION_SECS",
            DEFAULT_JOB_RETENTION_SECS,
        )?);
        let cleanup_interval_secs = parse_or(
            read("CLEANUP_INTERVAL_SECS"),
            "CLEANUP_INTERVAL_SECS",
            DEFAULT_CLEANUP_INTERVAL_SECS,
        )?;
        if cleanup_interval_secs == 0 {
            return Err(anyhow!("CLEANUP_INTERVAL_SECS must be greater than zero"));
        }

        Ok(Self {
            port,
            session_file,
            geolocation,
            fixed_position,
            upload_max_bytes,
            analysis_delay,
            progress_tick: Duration::from_millis(progress_tick_ms),
            job_retention,
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has invalid value `{raw}`")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow!("{key} has invalid value `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.session_file, PathBuf::from("storage/session.json"));
        assert_eq!(settings.geolocation, DetectOptions::default());
        assert_eq!(settings.fixed_position, None);
        assert_eq!(settings.upload_max_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.analysis_delay, Duration::from_secs(3));
        assert_eq!(settings.progress_tick, Duration::from_millis(300));
        assert_eq!(settings.job_retention, Duration::from_secs(3600));
        assert_eq!(settings.cleanup_interval, Duration::from_secs(900));
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = settings(&[
            ("PORT", "9000"),
            ("GEO_HIGH_ACCURACY", "off"),
            ("GEO_TIMEOUT_MS", "5000"),
            ("GEO_FIXED_LAT", "14.5995"),
            ("GEO_FIXED_LNG", "120.9842"),
            ("JOB_RETENTION_SECS", "120"),
        ])
        .unwrap();
        assert_eq!(settings.job_retention, Duration::from_secs(120));

        assert_eq!(settings.port, 9000);
        assert!(!settings.geolocation.enable_high_accuracy);
        assert_eq!(settings.geolocation.timeout_ms, 5000);
        assert_eq!(settings.fixed_position, Coordinates::new(14.5995, 120.9842));
    }

    #[test]
    fn invalid_values_fail_with_context() {
        let err = settings(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        assert!(settings(&[("GEO_FIXED_LAT", "10.0")]).is_err());
        assert!(settings(&[("GEO_FIXED_LAT", "95"), ("GEO_FIXED_LNG", "0")]).is_err());
        assert!(settings(&[("PROGRESS_TICK_MS", "0")]).is_err());
        assert!(settings(&[("CLEANUP_INTERVAL_SECS", "0")]).is_err());
    }
}
