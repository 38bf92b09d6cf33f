use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{Department, DirectoryError, Hospital};

pub struct HospitalService {
    supabase: SupabaseClient,
}

impl HospitalService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// All hospitals, ordered by name.
    pub async fn list_hospitals(&self) -> Result<Vec<Hospital>, DirectoryError> {
        debug!("Fetching hospitals");

        self.supabase
            .request(Method::GET, "/rest/v1/hospitals?select=*&order=name.asc", None, None)
            .await
            .map_err(|e| DirectoryError::LoadFailed {
                what: "hospitals",
                message: e.to_string(),
            })
    }

    pub async fn get_hospital(&self, hospital_id: Uuid) -> Result<Hospital, DirectoryError> {
        debug!("Fetching hospital: {}", hospital_id);

        let path = format!("/rest/v1/hospitals?id=eq.{}", hospital_id);
        let result: Vec<Hospital> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| DirectoryError::LoadFailed {
                what: "hospital",
                message: e.to_string(),
            })?;

        result.into_iter().next().ok_or(DirectoryError::HospitalNotFound)
    }

    /// Departments of one hospital, ordered by name. Rows belonging to any
    /// other hospital are dropped even if the store returns them.
    pub async fn list_departments(&self, hospital_id: Uuid) -> Result<Vec<Department>, DirectoryError> {
        debug!("Fetching departments for hospital: {}", hospital_id);

        let path = format!(
            "/rest/v1/departments?hospital_id=eq.{}&order=name.asc",
            hospital_id
        );
        let departments: Vec<Department> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| DirectoryError::LoadFailed {
                what: "departments",
                message: e.to_string(),
            })?;

        Ok(retain_hospital(departments, hospital_id))
    }
}

fn retain_hospital(departments: Vec<Department>, hospital_id: Uuid) -> Vec<Department> {
    let total = departments.len();
    let kept: Vec<Department> = departments
        .into_iter()
        .filter(|d| d.hospital_id == hospital_id)
        .collect();

    if kept.len() != total {
        warn!(
            "Dropped {} department rows not belonging to hospital {}",
            total - kept.len(),
            hospital_id
        );
    }
    kept
}
