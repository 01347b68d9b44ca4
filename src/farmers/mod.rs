use std::{sync::RwLock, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{location::LocationFix, notify::Notice};

/// Simulated round trip for saving a form.
pub const SAVE_DELAY_MS: u64 = 1_500;

/// Why a registration or scheduling form was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    MissingInformation { missing: Vec<&'static str> },
    LocationRequired,
}

impl FormError {
    pub fn notice(&self) -> Notice {
        match self {
            FormError::MissingInformation { .. } => Notice::destructive(
                "Missing information",
                "Please fill in all required fields",
            ),
            FormError::LocationRequired => Notice::destructive(
                "Location required",
                "Please detect or enter your location coordinates",
            ),
        }
    }

    pub fn message(&self) -> String {
        self.notice().description
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::MissingInformation { missing } => {
                write!(f, "missing required fields: {}", missing.join(", "))
            }
            FormError::LocationRequired => write!(f, "field coordinates are required"),
        }
    }
}

impl std::error::Error for FormError {}

/// Collects the names of blank entries, in order.
pub(crate) fn blank_fields(fields: &[(&'static str, &str)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FarmerForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location_label: String,
    #[serde(default)]
    pub coordinates: Option<LocationFix>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FarmerRecord {
    pub id: u32,
    pub name: String,
    pub phone: String,
    pub location_label: String,
    pub coordinates: Option<LocationFix>,
    pub created_at: DateTime<Utc>,
}

/// In-process registry of farmers and their fields.
pub struct FarmerDirectory {
    save_delay: Duration,
    records: RwLock<Vec<FarmerRecord>>,
}

impl FarmerDirectory {
    #[cfg(test)]
    pub fn new(save_delay: Duration) -> Self {
        Self {
            save_delay,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn seeded(save_delay: Duration) -> Self {
        let created_at = Utc::now();
        let demo = [
            ("John Smith", "Northern Fields", "+1234567890"),
            ("Maria Garcia", "Western Province", "+1987654321"),
            ("Rajesh Kumar", "Eastern District", "+9876543210"),
        ];
        let records = demo
            .into_iter()
            .zip(1u32..)
            .map(|((name, location_label, phone), id)| FarmerRecord {
                id,
                name: name.to_string(),
                phone: phone.to_string(),
                location_label: location_label.to_string(),
                coordinates: None,
                created_at,
            })
            .collect();

        Self {
            save_delay,
            records: RwLock::new(records),
        }
    }

    pub fn list(&self) -> Vec<FarmerRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }


    pub async fn register(&self, form: FarmerForm) -> Result<FarmerRecord, FormError> {
        let missing = blank_fields(&[
            ("name", &form.name),
            ("phone", &form.phone),
            ("location_label", &form.location_label),
        ]);
        if !missing.is_empty() {
            debug!(?missing, "farmer form incomplete");
            return Err(FormError::MissingInformation { missing });
        }
        let Some(coordinates) = form.coordinates else {
            return Err(FormError::LocationRequired);
        };

        sleep(self.save_delay).await;

        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = records.iter().map(|record| record.id).max().unwrap_or(0) + 1;
        let record = FarmerRecord {
            id,
            name: form.name.trim().to_string(),
            phone: form.phone.trim().to_string(),
            location_label: form.location_label.trim().to_string(),
            coordinates: Some(coordinates),
            created_at: Utc::now(),
        };
        records.push(record.clone());
        info!(farmer_id = id, "farmer details saved");
        Ok(record)
    }
}

impl Default for FarmerDirectory {
    fn default() -> Self {
        Self::seeded(Duration::from_millis(SAVE_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn form() -> FarmerForm {
        FarmerForm {
            name: " Ana Cruz ".to_string(),
            phone: "+639171234567".to_string(),
            location_label: "North Field, Block A".to_string(),
            coordinates: Some(LocationFix::Coordinates {
                lat: 14.5995,
                lng: 120.9842,
            }),
        }
    }

    #[test]
    fn seeded_directory_has_demo_farmers() {
        let directory = FarmerDirectory::default();
        let names: Vec<_> = directory.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["John Smith", "Maria Garcia", "Rajesh Kumar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn register_waits_for_the_save_and_appends() {
        let directory = FarmerDirectory::default();
        let started = Instant::now();

        let record = directory.register(form()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(SAVE_DELAY_MS));
        assert_eq!(record.id, 4);
        assert_eq!(record.name, "Ana Cruz");
        assert_eq!(directory.list().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_fields_are_reported_in_order() {
        let directory = FarmerDirectory::new(Duration::ZERO);
        let err = directory
            .register(FarmerForm {
                name: "  ".to_string(),
                location_label: String::new(),
                ..form()
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            FormError::MissingInformation {
                missing: vec!["name", "location_label"]
            }
        );
        assert!(directory.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn coordinates_are_required() {
        let directory = FarmerDirectory::new(Duration::ZERO);
        let err = directory
            .register(FarmerForm {
                coordinates: None,
                ..form()
            })
            .await
            .unwrap_err();

        assert_eq!(err, FormError::LocationRequired);
        assert_eq!(err.notice().title, "Location required");
    }
}
