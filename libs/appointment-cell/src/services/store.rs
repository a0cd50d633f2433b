// libs/appointment-cell/src/services/store.rs
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{StoreError, SupabaseClient};

use crate::models::{Appointment, AppointmentSearchQuery, AppointmentStatus};

/// Appointment persistence, backed by a PostgREST-style REST API.
///
/// All conflict detection in the scheduling core is expressed as queries
/// against this store; the database's uniqueness constraints on
/// `confirmation_code` and on (doctor_id, start_at) for non-canceled rows
/// are the final authority under concurrent bookings.
pub struct AppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl AppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Non-canceled appointments for a doctor with start in `[from, to]`,
    /// chronologically ordered. Feeds the availability calculator.
    pub async fn find_by_doctor_and_time_range(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=neq.canceled&start_at=gte.{}&start_at=lte.{}&order=start_at.asc",
            doctor_id,
            urlencoding::encode(&from.to_rfc3339()),
            urlencoding::encode(&to.to_rfc3339()),
        );

        self.fetch_appointments(&path, auth_token).await
    }

    /// The authoritative pre-insert conflict recheck: any non-canceled
    /// appointment at exactly (doctor, start)?
    pub async fn find_by_doctor_and_start(
        &self,
        doctor_id: Uuid,
        start_at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_at=eq.{}&status=neq.canceled&limit=1",
            doctor_id,
            urlencoding::encode(&start_at.to_rfc3339()),
        );

        let mut appointments = self.fetch_appointments(&path, auth_token).await?;
        Ok(if appointments.is_empty() {
            None
        } else {
            Some(appointments.remove(0))
        })
    }

    pub async fn exists_by_confirmation_code(
        &self,
        code: &str,
        auth_token: &str,
    ) -> Result<bool, StoreError> {
        let path = format!(
            "/rest/v1/appointments?confirmation_code=eq.{}&select=id&limit=1",
            urlencoding::encode(code)
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(!result.is_empty())
    }

    pub async fn find_by_confirmation_code(
        &self,
        code: &str,
        auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?confirmation_code=eq.{}&limit=1",
            urlencoding::encode(code)
        );

        let mut appointments = self.fetch_appointments(&path, auth_token).await?;
        Ok(if appointments.is_empty() {
            None
        } else {
            Some(appointments.remove(0))
        })
    }

    pub async fn find_by_id(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut appointments = self.fetch_appointments(&path, auth_token).await?;
        Ok(if appointments.is_empty() {
            None
        } else {
            Some(appointments.remove(0))
        })
    }

    /// Insert a new appointment. A `StoreError::UniquenessViolation` means
    /// one of the two constraints fired; the caller decides whether to retry
    /// (code collision) or surface a slot conflict.
    pub async fn insert(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<Appointment, StoreError> {
        debug!("Inserting appointment {} for doctor {}", appointment.id, appointment.doctor_id);

        let payload = json!({
            "id": appointment.id,
            "patient_id": appointment.patient_id,
            "doctor_id": appointment.doctor_id,
            "start_at": appointment.start_at.to_rfc3339(),
            "end_at": appointment.end_at.to_rfc3339(),
            "status": appointment.status,
            "confirmation_code": appointment.confirmation_code,
            "note": appointment.note,
            "created_at": appointment.created_at.to_rfc3339(),
            "updated_at": appointment.updated_at.to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(payload),
                Some(headers),
            )
            .await?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Api {
                status: 500,
                body: "insert returned no representation".to_string(),
            })
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, StoreError> {
        debug!("Updating appointment {} status to {}", appointment_id, status);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let payload = json!({
            "status": status,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(payload),
                Some(headers),
            )
            .await?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound("appointment not found".to_string()))
    }

    /// Filtered listing for staff dashboards and calendar views.
    pub async fn search(
        &self,
        query: &AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(ref code) = query.code {
            let normalized = code.trim().to_uppercase();
            query_parts.push(format!(
                "confirmation_code=eq.{}",
                urlencoding::encode(&normalized)
            ));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!(
                "start_at=gte.{}",
                urlencoding::encode(&from_date.to_rfc3339())
            ));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!(
                "start_at=lte.{}",
                urlencoding::encode(&to_date.to_rfc3339())
            ));
        }

        query_parts.push("order=start_at.asc".to_string());

        if let Some(limit) = query.limit {
            query_parts.push(format!("limit={}", limit));
        }
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));

        self.fetch_appointments(&path, auth_token).await
    }

    async fn fetch_appointments(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| StoreError::Api {
                status: 500,
                body: format!("failed to parse appointments: {}", e),
            })
    }
}
