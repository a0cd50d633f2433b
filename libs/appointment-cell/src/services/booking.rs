// libs/appointment-cell/src/services/booking.rs
use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingPolicy};
use shared_database::supabase::{StoreError, SupabaseClient};

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookAppointmentResponse, SchedulingError,
};
use crate::services::confirmation::{self, MAX_CODE_ATTEMPTS};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

pub struct BookingService {
    store: AppointmentStore,
    lifecycle: AppointmentLifecycleService,
    policy: SchedulingPolicy,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            store: AppointmentStore::new(supabase),
            lifecycle: AppointmentLifecycleService::new(),
            policy: config.scheduling,
        }
    }

    /// Book a slot for a patient.
    ///
    /// The availability view the patient picked from may be stale by the time
    /// the request lands, so the store is re-queried for the exact
    /// (doctor, start) pair before inserting. That recheck narrows the race
    /// window; the database's uniqueness constraint closes it, and a
    /// constraint violation on insert comes back as `SlotAlreadyTaken`.
    /// Slot conflicts are surfaced to the caller without retrying; only
    /// confirmation-code collisions are retried, with a fresh code each time.
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<BookAppointmentResponse, SchedulingError> {
        let now = Utc::now();
        let start_at = request.date.and_time(request.time).and_utc();

        info!(
            "Booking request: doctor {} patient {} at {}",
            request.doctor_id, request.patient_id, start_at
        );

        validate_slot_shape(start_at, now, &self.policy)?;

        // Authoritative conflict recheck before touching anything else.
        let existing = self
            .store
            .find_by_doctor_and_start(request.doctor_id, start_at, auth_token)
            .await
            .map_err(storage_error)?;

        if existing.is_some() {
            warn!(
                "Slot conflict: doctor {} already booked at {}",
                request.doctor_id, start_at
            );
            return Err(SchedulingError::SlotAlreadyTaken);
        }

        let end_at = start_at + self.policy.slot_duration();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = confirmation::generate_unique_code(|candidate| {
                let store = &self.store;
                async move {
                    store
                        .exists_by_confirmation_code(&candidate, auth_token)
                        .await
                        .map_err(storage_error)
                }
            })
            .await?;

            let created_at = Utc::now();
            let appointment = Appointment {
                id: Uuid::new_v4(),
                patient_id: request.patient_id,
                doctor_id: request.doctor_id,
                start_at,
                end_at,
                status: AppointmentStatus::Confirmed,
                confirmation_code: code.clone(),
                note: request.note.clone(),
                created_at,
                updated_at: created_at,
            };

            match self.store.insert(&appointment, auth_token).await {
                Ok(saved) => {
                    info!(
                        "Appointment {} booked with confirmation code {}",
                        saved.id, code
                    );
                    return Ok(BookAppointmentResponse {
                        appointment: saved,
                        confirmation_code: code,
                    });
                }
                // The store enforces uniqueness on both the confirmation code
                // and the (doctor, start) pair; only the former is retryable.
                Err(StoreError::UniquenessViolation(body)) => {
                    if body.contains("confirmation_code") {
                        warn!("Confirmation code {} lost an insert race, redrawing", code);
                        continue;
                    }
                    warn!(
                        "Concurrent booking won the slot: doctor {} at {}",
                        request.doctor_id, start_at
                    );
                    return Err(SchedulingError::SlotAlreadyTaken);
                }
                Err(e) => return Err(storage_error(e)),
            }
        }

        Err(SchedulingError::GenerationFailed)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Fetching appointment {}", appointment_id);

        self.store
            .find_by_id(appointment_id, auth_token)
            .await
            .map_err(storage_error)?
            .ok_or(SchedulingError::NotFound)
    }

    /// Public confirmation lookup. Codes are case-insensitive on input and
    /// stored uppercase. Anything that does not match the issued format
    /// cannot exist, so it is rejected here without a store round-trip.
    pub async fn verify_code(
        &self,
        code: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let normalized = code.trim().to_uppercase();
        if !confirmation::is_valid_code(&normalized) {
            debug!("Confirmation code {:?} is not in the issued format", normalized);
            return Err(SchedulingError::NotFound);
        }
        debug!("Verifying confirmation code {}", normalized);

        self.store
            .find_by_confirmation_code(&normalized, auth_token)
            .await
            .map_err(storage_error)?
            .ok_or(SchedulingError::NotFound)
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle
            .validate_status_transition(current.status, new_status)?;

        let updated = self
            .store
            .update_status(appointment_id, new_status, auth_token)
            .await
            .map_err(storage_error)?;

        info!(
            "Appointment {} transitioned {} -> {}",
            appointment_id, current.status, new_status
        );
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        self.update_status(appointment_id, AppointmentStatus::Canceled, auth_token)
            .await
    }

    pub async fn search(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Searching appointments with filters: {:?}", query);

        self.store.search(&query, auth_token).await.map_err(storage_error)
    }
}

fn storage_error(e: StoreError) -> SchedulingError {
    SchedulingError::StorageError(e.to_string())
}

/// Reject malformed slot requests before any store round-trip: the start
/// must sit on the slot grid, inside the working window, and strictly in
/// the future.
pub fn validate_slot_shape(
    start_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &SchedulingPolicy,
) -> Result<(), SchedulingError> {
    if start_at <= now {
        return Err(SchedulingError::InvalidSlot(
            "requested slot is in the past".to_string(),
        ));
    }

    let hour = start_at.hour();
    if hour < policy.work_start_hour || hour >= policy.work_end_hour {
        return Err(SchedulingError::InvalidSlot(format!(
            "requested time is outside working hours ({}:00-{}:00)",
            policy.work_start_hour, policy.work_end_hour
        )));
    }

    if start_at.second() != 0 || start_at.minute() % policy.slot_minutes != 0 {
        return Err(SchedulingError::InvalidSlot(format!(
            "requested time is not aligned to {}-minute slots",
            policy.slot_minutes
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn policy() -> SchedulingPolicy {
        SchedulingPolicy::default()
    }

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, mi, 0).unwrap()
    }

    #[test]
    fn accepts_an_aligned_future_slot() {
        assert!(validate_slot_shape(at(9, 30), at(8, 0), &policy()).is_ok());
    }

    #[test]
    fn rejects_past_slots() {
        assert_matches!(
            validate_slot_shape(at(9, 0), at(10, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );
    }

    #[test]
    fn rejects_slot_equal_to_now() {
        assert_matches!(
            validate_slot_shape(at(9, 0), at(9, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );
    }

    #[test]
    fn rejects_times_outside_working_hours() {
        assert_matches!(
            validate_slot_shape(at(8, 30), at(7, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );
        // 17:00 is the exclusive end of the window.
        assert_matches!(
            validate_slot_shape(at(17, 0), at(7, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );
        assert!(validate_slot_shape(at(16, 30), at(7, 0), &policy()).is_ok());
    }

    #[test]
    fn rejects_off_grid_minutes() {
        assert_matches!(
            validate_slot_shape(at(9, 15), at(8, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );

        let with_seconds = Utc.with_ymd_and_hms(2024, 1, 10, 9, 30, 12).unwrap();
        assert_matches!(
            validate_slot_shape(with_seconds, at(8, 0), &policy()),
            Err(SchedulingError::InvalidSlot(_))
        );
    }
}
