use std::{collections::HashMap, sync::RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Record every unknown id falls back to.
pub const FALLBACK_RESULT_ID: &str = "analysis-001";
/// Alias used by the navigation's "latest result" link.
pub const LATEST_RESULT_ID: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub crop_name: String,
    pub date: NaiveDate,
    pub location: String,
    pub disease_label: Option<String>,
    /// Percentage in `0..=100`.
    pub confidence: u8,
    pub severity: Option<Severity>,
    pub solutions: Vec<String>,
}

impl AnalysisResult {
    pub fn is_healthy(&self) -> bool {
        self.disease_label.is_none()
    }

    pub fn headline(&self) -> String {
        match &self.disease_label {
            Some(label) => format!("Detected Disease: {label}"),
            None => "Healthy Rice Plant Detected".to_string(),
        }
    }
}

/// What an analysis backend reports about one image, before the run is
/// given a result id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFindings {
    pub crop_name: String,
    pub disease_label: Option<String>,
    pub confidence: u8,
    pub severity: Option<Severity>,
    pub solutions: Vec<String>,
}

impl AnalysisFindings {
    pub fn into_result(self, id: String, date: NaiveDate, location: String) -> AnalysisResult {
        AnalysisResult {
            id,
            crop_name: self.crop_name,
            date,
            location,
            disease_label: self.disease_label,
            confidence: self.confidence.min(100),
            severity: self.severity,
            solutions: self.solutions,
        }
    }
}

impl From<AnalysisResult> for AnalysisFindings {
    fn from(value: AnalysisResult) -> Self {
        Self {
            crop_name: value.crop_name,
            disease_label: value.disease_label,
            confidence: value.confidence,
            severity: value.severity,
            solutions: value.solutions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResultSummary {
    pub total: usize,
    pub healthy: usize,
    pub diseased: usize,
}

/// Keyed lookup from result id to analysis outcome.
///
/// Unknown ids resolve to the [`FALLBACK_RESULT_ID`] record rather than an
/// error, which is what the results view expects.
pub struct ResultStore {
    records: RwLock<HashMap<String, AnalysisResult>>,
}

impl ResultStore {
    pub fn empty() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Store pre-populated with the demo analyses.
    pub fn seeded() -> Self {
        let store = Self::empty();
        for record in seed_records() {
            store.register(record);
        }
        store
    }

    pub fn register(&self, result: AnalysisResult) {
        debug!(result_id = %result.id, "registering analysis result");
        let mut guard = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(result.id.clone(), result);
    }

    /// Registers a freshly completed run and points the `latest` alias at it.
    pub fn publish(&self, result: AnalysisResult) {
        let latest = AnalysisResult {
            id: LATEST_RESULT_ID.to_string(),
            ..result.clone()
        };
        let mut guard = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(result_id = %result.id, "analysis result published");
        guard.insert(result.id.clone(), result);
        guard.insert(latest.id.clone(), latest);
    }

    pub fn get(&self, id: &str) -> Option<AnalysisResult> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Looks up `id`, falling back to the designated default record.
    pub fn lookup(&self, id: &str) -> AnalysisResult {
        if let Some(found) = self.get(id) {
            return found;
        }
        info!(result_id = %id, "unknown result id, serving fallback record");
        self.get(FALLBACK_RESULT_ID)
            .unwrap_or_else(|| seed_records().remove(0))
    }

    /// Records sorted newest first; the `latest` alias is excluded.
    pub fn list(&self) -> Vec<AnalysisResult> {
        let guard = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut records: Vec<_> = guard
            .values()
            .filter(|record| record.id != LATEST_RESULT_ID)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn summary(&self) -> ResultSummary {
        let records = self.list();
        let healthy = records.iter().filter(|record| record.is_healthy()).count();
        ResultSummary {
            total: records.len(),
            healthy,
            diseased: records.len() - healthy,
        }
    }
}

fn demo_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Disease templates the simulated analysis draws from.
pub fn seed_records() -> Vec<AnalysisResult> {
    let brown_spot = AnalysisResult {
        id: "analysis-003".to_string(),
        crop_name: "Rice".to_string(),
        date: demo_date(2023, 10, 18),
        location: "Field C".to_string(),
        disease_label: Some("Brown Spot".to_string()),
        confidence: 95,
        severity: Some(Severity::High),
        solutions: strings(&[
            "Apply recommended fungicides immediately",
            "Improve field drainage to reduce humidity",
            "Consider increasing spacing between plants",
            "Apply balanced NPK fertilizers",
        ]),
    };

    vec![
        AnalysisResult {
            id: FALLBACK_RESULT_ID.to_string(),
            crop_name: "Rice".to_string(),
            date: demo_date(2023, 10, 12),
            location: "Field A".to_string(),
            disease_label: Some("Leaf Blight".to_string()),
            confidence: 92,
            severity: Some(Severity::Medium),
            solutions: strings(&[
                "Apply fungicides containing tricyclazole",
                "Ensure proper drainage around plants",
                "Maintain proper water management",
                "Use balanced fertilization",
            ]),
        },
        AnalysisResult {
            id: "analysis-002".to_string(),
            crop_name: "Rice".to_string(),
            date: demo_date(2023, 10, 15),
            location: "Field B".to_string(),
            disease_label: None,
            confidence: 89,
            severity: None,
            solutions: strings(&[
                "Continue current cultivation practices",
                "Regularly monitor for any signs of disease",
                "Maintain good irrigation practices",
            ]),
        },
        brown_spot.clone(),
        AnalysisResult {
            id: LATEST_RESULT_ID.to_string(),
            ..brown_spot
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_fall_back_to_the_default_record() {
        let store = ResultStore::seeded();
        let found = store.lookup("analysis-zzz");
        assert_eq!(found.id, FALLBACK_RESULT_ID);
        assert_eq!(found.disease_label.as_deref(), Some("Leaf Blight"));
    }

    #[test]
    fn empty_store_still_has_a_fallback() {
        let store = ResultStore::empty();
        assert_eq!(store.lookup("anything").id, FALLBACK_RESULT_ID);
    }

    #[test]
    fn registered_results_are_served_verbatim() {
        let store = ResultStore::seeded();
        let mut record = store.lookup("analysis-002");
        record.id = "analysis-abc123def".to_string();
        store.register(record.clone());

        assert_eq!(store.lookup("analysis-abc123def"), record);
        assert!(store.lookup("analysis-abc123def").is_healthy());
    }

    #[test]
    fn publish_moves_the_latest_alias() {
        let store = ResultStore::seeded();
        let mut record = store.lookup("analysis-002");
        record.id = "analysis-0a1b2c3d4".to_string();
        store.publish(record.clone());

        assert_eq!(store.lookup("analysis-0a1b2c3d4"), record);
        assert!(store.lookup(LATEST_RESULT_ID).is_healthy());
        assert_eq!(store.summary().total, 4);
    }

    #[test]
    fn summary_counts_exclude_the_latest_alias() {
        let summary = ResultStore::seeded().summary();
        assert_eq!(
            summary,
            ResultSummary {
                total: 3,
                healthy: 1,
                diseased: 2
            }
        );
    }

    #[test]
    fn findings_confidence_is_clamped() {
        let mut findings = AnalysisFindings::from(ResultStore::seeded().lookup("analysis-003"));
        findings.confidence = 140;
        let result = findings.into_result(
            "analysis-x".to_string(),
            demo_date(2024, 1, 2),
            "North Field".to_string(),
        );
        assert_eq!(result.confidence, 100);
        assert_eq!(result.location, "North Field");
    }

    #[test]
    fn headline_reflects_health() {
        let store = ResultStore::seeded();
        assert_eq!(store.lookup("analysis-002").headline(), "Healthy Rice Plant Detected");
        assert_eq!(store.lookup("latest").headline(), "Detected Disease: Brown Spot");
    }
}
