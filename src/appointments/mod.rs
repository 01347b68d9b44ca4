use std::{sync::RwLock, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::info;

use crate::farmers::{FormError, SAVE_DELAY_MS, blank_fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
}

/// What the scheduling dialog submits. The calendar widget supplies `date`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentRequest {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: u32,
    pub name: String,
    pub date: NaiveDate,
    pub time: String,
    pub mode: String,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

pub struct AppointmentBook {
    save_delay: Duration,
    entries: RwLock<Vec<Appointment>>,
}

impl AppointmentBook {
    pub fn new(save_delay: Duration) -> Self {
        Self {
            save_delay,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn seeded(save_delay: Duration) -> Self {
        let created_at = Utc::now();
        let demo = [
            ("Field Inspection", (2023, 11, 15), "10:00 AM", AppointmentStatus::Confirmed),
            ("Crop Health Assessment", (2023, 11, 20), "2:30 PM", AppointmentStatus::Pending),
        ];
        let entries = demo
            .into_iter()
            .zip(1u32..)
            .filter_map(|((name, (y, m, d), time, status), id)| {
                Some(Appointment {
                    id,
                    name: name.to_string(),
                    date: NaiveDate::from_ymd_opt(y, m, d)?,
                    time: time.to_string(),
                    mode: "In person".to_string(),
                    notes: None,
                    status,
                    created_at,
                })
            })
            .collect();

        Self {
            save_delay,
            entries: RwLock::new(entries),
        }
    }

    pub fn list(&self) -> Vec<Appointment> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn schedule(&self, request: AppointmentRequest) -> Result<Appointment, FormError> {
        let mut missing = Vec::new();
        if request.date.is_none() {
            missing.push("date");
        }
        missing.extend(blank_fields(&[("time", &request.time), ("kind", &request.kind)]));
        let Some(date) = request.date.filter(|_| missing.is_empty()) else {
            return Err(FormError::MissingInformation { missing });
        };

        sleep(self.save_delay).await;

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let appointment = Appointment {
            id: entries.len() as u32 + 1,
            name: request.kind.trim().to_string(),
            date,
            time: request.time.trim().to_string(),
            mode: "In person".to_string(),
            notes: request
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            status: AppointmentStatus::Pending,
            created_at: Utc::now(),
        };
        entries.push(appointment.clone());
        info!(appointment_id = appointment.id, %date, "appointment scheduled");
        Ok(appointment)
    }
}

impl Default for AppointmentBook {
    fn default() -> Self {
        Self::seeded(Duration::from_millis(SAVE_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AppointmentRequest {
        AppointmentRequest {
            date: NaiveDate::from_ymd_opt(2024, 3, 4),
            time: "09:30".to_string(),
            kind: "Soil Testing".to_string(),
            notes: Some("  ".to_string()),
        }
    }

    #[test]
    fn seeded_book_matches_demo_data() {
        let entries = AppointmentBook::default().list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Field Inspection");
        assert_eq!(entries[0].status, AppointmentStatus::Confirmed);
        assert_eq!(entries[1].date, NaiveDate::from_ymd_opt(2023, 11, 20).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_appends_a_pending_entry() {
        let book = AppointmentBook::default();
        let appointment = book.schedule(request()).await.unwrap();

        assert_eq!(appointment.id, 3);
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.notes, None);
        assert_eq!(book.list().last(), Some(&appointment));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fields_are_refused() {
        let book = AppointmentBook::new(Duration::ZERO);
        let err = book
            .schedule(AppointmentRequest {
                date: None,
                kind: String::new(),
                ..request()
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            FormError::MissingInformation {
                missing: vec!["date", "kind"]
            }
        );
        assert!(book.list().is_empty());
    }
}
