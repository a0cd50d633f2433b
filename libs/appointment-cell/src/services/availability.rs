// libs/appointment-cell/src/services/availability.rs
use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingPolicy};
use shared_database::supabase::SupabaseClient;

use crate::models::{SchedulingError, Slot};
use crate::services::store::AppointmentStore;

/// Computes bookable slots for a doctor over the booking horizon.
///
/// The slot set is recomputed fresh on every call: the full candidate grid
/// is cheap to walk (horizon_days x slots/day) and the occupied set is small
/// relative to it, so nothing is cached.
pub struct AvailabilityService {
    store: AppointmentStore,
    policy: SchedulingPolicy,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            store: AppointmentStore::new(supabase),
            policy: config.scheduling,
        }
    }

    /// All free, strictly-future slots for the doctor within the horizon,
    /// in chronological order.
    pub async fn compute_slots(
        &self,
        doctor_id: Uuid,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SchedulingError> {
        debug!("Computing availability for doctor {} from {}", doctor_id, now);

        let horizon_end = now + Duration::days(self.policy.horizon_days);

        let appointments = self
            .store
            .find_by_doctor_and_time_range(doctor_id, now, horizon_end, auth_token)
            .await
            .map_err(|e| SchedulingError::StorageError(e.to_string()))?;

        let occupied: HashSet<DateTime<Utc>> = appointments
            .iter()
            .map(|apt| truncate_to_minute(apt.start_at))
            .collect();

        let slots = slot_grid(now, &self.policy, &occupied);
        debug!("Doctor {} has {} open slots", doctor_id, slots.len());

        Ok(slots)
    }
}

/// Walk the candidate grid from the first working instant of `now`'s day to
/// the end of the horizon, skipping occupied keys and anything not strictly
/// in the future. Outside the `[work_start, work_end)` window the cursor
/// jumps to the next day's opening instant instead of advancing slot by slot.
pub fn slot_grid(
    now: DateTime<Utc>,
    policy: &SchedulingPolicy,
    occupied: &HashSet<DateTime<Utc>>,
) -> Vec<Slot> {
    let mut slots = Vec::new();

    // A degenerate policy (zero-length slots, inverted window) produces no
    // slots; without this the cursor could never advance past `now`.
    if !policy.is_valid() {
        return slots;
    }

    let Some(opening) = now
        .date_naive()
        .and_hms_opt(policy.work_start_hour, 0, 0)
    else {
        return slots;
    };

    let mut cursor = opening.and_utc();
    let horizon_end = now + Duration::days(policy.horizon_days);

    while cursor <= horizon_end {
        let hour = cursor.hour();
        if hour >= policy.work_start_hour && hour < policy.work_end_hour {
            // Half-open window: a cursor landing exactly on work_end_hour
            // never gets here.
            if cursor > now && !occupied.contains(&cursor) {
                slots.push(Slot::from_start(cursor));
            }
            cursor += policy.slot_duration();
        } else {
            let next_day = cursor.date_naive() + Duration::days(1);
            match next_day.and_hms_opt(policy.work_start_hour, 0, 0) {
                Some(next_opening) => cursor = next_opening.and_utc(),
                None => break,
            }
        }
    }

    slots
}

/// Occupied keys are normalized to slot granularity by dropping seconds,
/// matching the minute-keyed comparison the booking flow uses.
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> SchedulingPolicy {
        SchedulingPolicy {
            work_start_hour: 9,
            work_end_hour: 17,
            slot_minutes: 30,
            horizon_days: 1,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn full_grid_when_doctor_has_no_appointments() {
        let now = at(2024, 1, 10, 8, 0);
        let slots = slot_grid(now, &policy(), &HashSet::new());

        // 16 half-hour slots between 09:00 and 17:00.
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].start_at, at(2024, 1, 10, 9, 0));
        assert_eq!(slots[15].start_at, at(2024, 1, 10, 16, 30));
    }

    #[test]
    fn occupied_slot_is_excluded() {
        let now = at(2024, 1, 10, 8, 0);
        let occupied: HashSet<_> = [at(2024, 1, 10, 9, 0)].into_iter().collect();

        let slots = slot_grid(now, &policy(), &occupied);

        assert_eq!(slots.len(), 15);
        assert!(!slots.iter().any(|s| s.start_at == at(2024, 1, 10, 9, 0)));
        assert!(slots.iter().any(|s| s.start_at == at(2024, 1, 10, 9, 30)));
        assert!(slots.iter().any(|s| s.start_at == at(2024, 1, 10, 16, 30)));
    }

    #[test]
    fn no_slot_at_or_after_closing_hour() {
        let now = at(2024, 1, 10, 8, 0);
        let slots = slot_grid(now, &policy(), &HashSet::new());

        assert!(slots.iter().all(|s| s.start_at.hour() < 17));
        assert!(slots.iter().all(|s| s.start_at.hour() >= 9));
    }

    #[test]
    fn past_slots_today_are_excluded() {
        // Mid-afternoon: the morning grid is gone even though unoccupied.
        let now = at(2024, 1, 10, 14, 15);
        let slots = slot_grid(now, &policy(), &HashSet::new());

        assert!(slots.iter().all(|s| s.start_at > now));
        assert_eq!(slots[0].start_at, at(2024, 1, 10, 14, 30));
    }

    #[test]
    fn slot_exactly_at_now_is_excluded() {
        let now = at(2024, 1, 10, 9, 0);
        let slots = slot_grid(now, &policy(), &HashSet::new());

        assert!(!slots.iter().any(|s| s.start_at == now));
        assert_eq!(slots[0].start_at, at(2024, 1, 10, 9, 30));
    }

    #[test]
    fn slots_are_chronological_and_stable_across_calls() {
        let now = at(2024, 1, 10, 8, 0);
        let multi_day = SchedulingPolicy {
            horizon_days: 3,
            ..policy()
        };

        let first = slot_grid(now, &multi_day, &HashSet::new());
        let second = slot_grid(now, &multi_day, &HashSet::new());

        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].start_at < w[1].start_at));
    }

    #[test]
    fn cursor_jumps_overnight_to_next_opening() {
        let now = at(2024, 1, 10, 16, 45);
        let slots = slot_grid(now, &policy(), &HashSet::new());

        // Nothing left today after 16:30, so the first slot is tomorrow 09:00.
        assert_eq!(slots[0].start_at, at(2024, 1, 11, 9, 0));
    }

    #[test]
    fn degenerate_policy_produces_no_slots() {
        let zero_slots = SchedulingPolicy {
            slot_minutes: 0,
            ..policy()
        };
        assert!(slot_grid(at(2024, 1, 10, 8, 0), &zero_slots, &HashSet::new()).is_empty());

        let inverted = SchedulingPolicy {
            work_start_hour: 17,
            work_end_hour: 9,
            ..policy()
        };
        assert!(slot_grid(at(2024, 1, 10, 8, 0), &inverted, &HashSet::new()).is_empty());
    }

    #[test]
    fn truncation_drops_seconds() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 42).unwrap();
        assert_eq!(truncate_to_minute(instant), at(2024, 1, 10, 9, 0));
    }
}
