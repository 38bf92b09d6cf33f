use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, DoctorError};

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Active doctors of a department, ordered by name.
    pub async fn list_doctors(&self, department_id: Uuid) -> Result<Vec<Doctor>, DoctorError> {
        debug!("Fetching active doctors for department: {}", department_id);

        let path = format!(
            "/rest/v1/doctors?department_id=eq.{}&status=eq.active&order=name.asc",
            department_id
        );
        let doctors: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| DoctorError::LoadFailed(e.to_string()))?;

        Ok(retain_department(doctors, department_id))
    }

    /// Get doctor by ID
    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor profile: {}", doctor_id);

        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let result: Vec<Doctor> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| DoctorError::LoadFailed(e.to_string()))?;

        result.into_iter().next().ok_or(DoctorError::NotFound)
    }
}

fn retain_department(doctors: Vec<Doctor>, department_id: Uuid) -> Vec<Doctor> {
    let total = doctors.len();
    let kept: Vec<Doctor> = doctors
        .into_iter()
        .filter(|d| d.department_id == Some(department_id) && d.is_active())
        .collect();

    if kept.len() != total {
        warn!(
            "Dropped {} doctor rows outside department {} or inactive",
            total - kept.len(),
            department_id
        );
    }
    kept
}
