use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoctorStatus {
    Active,
    Inactive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    pub department_id: Option<Uuid>,
    pub hospital_id: Uuid,
    pub status: Option<DoctorStatus>,
    pub availability_start: Option<NaiveTime>,
    pub availability_end: Option<NaiveTime>,
    /// 0 = Sunday ... 6 = Saturday.
    pub working_days: Option<Vec<u32>>,
    pub user_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Doctor {
    /// A missing status counts as active.
    pub fn is_active(&self) -> bool {
        matches!(self.status, None | Some(DoctorStatus::Active))
    }

    pub fn works_on(&self, date: NaiveDate) -> bool {
        match &self.working_days {
            Some(days) if !days.is_empty() => {
                days.contains(&date.weekday().num_days_from_sunday())
            }
            _ => true,
        }
    }

    /// Start of the availability window is inclusive, the end exclusive.
    pub fn is_available_at(&self, time: NaiveTime) -> bool {
        let after_start = self.availability_start.map_or(true, |start| time >= start);
        let before_end = self.availability_end.map_or(true, |end| time < end);
        after_start && before_end
    }
}

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Failed to load doctors: {0}")]
    LoadFailed(String),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound => AppError::NotFound(err.to_string()),
            DoctorError::LoadFailed(_) => AppError::ExternalService(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doctor() -> Doctor {
        Doctor {
            id: Uuid::new_v4(),
            name: "Dr. A".to_string(),
            specialization: "Cardiology".to_string(),
            department_id: Some(Uuid::new_v4()),
            hospital_id: Uuid::new_v4(),
            status: None,
            availability_start: None,
            availability_end: None,
            working_days: None,
            user_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_status_defaults_to_active() {
        let mut d = doctor();
        assert!(d.is_active());

        d.status = Some(DoctorStatus::Inactive);
        assert!(!d.is_active());

        d.status = Some(DoctorStatus::Unknown);
        assert!(!d.is_active());
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let status: DoctorStatus = serde_json::from_str("\"on_leave\"").unwrap();
        assert_eq!(status, DoctorStatus::Unknown);
    }

    #[test]
    fn test_working_days_use_sunday_as_zero() {
        let mut d = doctor();
        d.working_days = Some(vec![1, 2, 3, 4, 5]);

        // 2025-03-10 is a Monday, 2025-03-09 a Sunday.
        assert!(d.works_on(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
        assert!(!d.works_on(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()));

        d.working_days = None;
        assert!(d.works_on(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()));
    }

    #[test]
    fn test_availability_window() {
        let mut d = doctor();
        d.availability_start = NaiveTime::from_hms_opt(9, 0, 0);
        d.availability_end = NaiveTime::from_hms_opt(13, 0, 0);

        assert!(d.is_available_at(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(d.is_available_at(NaiveTime::from_hms_opt(11, 30, 0).unwrap()));
        assert!(!d.is_available_at(NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
        assert!(!d.is_available_at(NaiveTime::from_hms_opt(14, 0, 0).unwrap()));
    }
}
