//! Provider double-booking detection.
//!
//! The detector is the advisory layer surfaced to callers; the store applies
//! the same [`blocks`] rule atomically with every write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Appointment, TenantId, TimeRange};
use crate::store::AppointmentStore;

/// Whether `existing` occupies any part of `window` for `provider_id` in `scope`.
///
/// Soft-deleted, cancelled and no-show appointments never block, and neither
/// does the appointment named by `exclude`. Windows are half-open, so a booking
/// ending at 10:00 leaves 10:00 free.
pub fn blocks(
    existing: &Appointment,
    scope: TenantId,
    provider_id: Uuid,
    window: &TimeRange,
    exclude: Option<Uuid>,
) -> bool {
    existing.tenant_id == scope
        && existing.provider_id == Some(provider_id)
        && exclude != Some(existing.id)
        && existing.holds_slot()
        && existing.window().overlaps_with(window)
}

/// Looks up a provider's bookings that collide with a proposed window.
#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Appointments blocking the proposed window, ordered by start.
    ///
    /// Store failures propagate; they are never read as "no conflict".
    pub async fn find_conflicts(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>> {
        let window = TimeRange::new(start, duration_minutes);
        let candidates = self
            .store
            .check_conflicts(scope, provider_id, &window, exclude)
            .await?;

        let conflicts: Vec<Appointment> = candidates
            .into_iter()
            .filter(|a| blocks(a, scope, provider_id, &window, exclude))
            .collect();

        debug!(
            provider_id = %provider_id,
            window = %window,
            conflicts = conflicts.len(),
            "Checked provider availability"
        );
        Ok(conflicts)
    }

    pub async fn has_conflict(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Uuid>,
    ) -> Result<bool> {
        Ok(!self
            .find_conflicts(scope, provider_id, start, duration_minutes, exclude)
            .await?
            .is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, AppointmentType};
    use crate::store::{AppointmentPatch, InMemoryAppointmentStore};
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, hour, minute, 0).unwrap()
    }

    async fn seeded(
        provider: Uuid,
        start: DateTime<Utc>,
        minutes: u32,
    ) -> (ConflictDetector, Arc<InMemoryAppointmentStore>, TenantId, Appointment) {
        let store = Arc::new(InMemoryAppointmentStore::new());
        let scope = TenantId::new();
        let existing = store
            .create(Appointment::scheduled(
                scope,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Some(provider),
                start,
                minutes,
                AppointmentType::Procedure,
                "Dental cleaning".to_string(),
                at(7, 0),
            ))
            .await
            .unwrap();
        (ConflictDetector::new(store.clone()), store, scope, existing)
    }

    #[tokio::test]
    async fn test_adjacent_slots_do_not_conflict() {
        let provider = Uuid::new_v4();
        let (detector, _, scope, _) = seeded(provider, at(9, 30), 30).await;

        assert!(!detector.has_conflict(scope, provider, at(10, 0), 30, None).await.unwrap());
        assert!(!detector.has_conflict(scope, provider, at(9, 0), 30, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_one_minute_overrun_conflicts() {
        let provider = Uuid::new_v4();
        let (detector, _, scope, existing) = seeded(provider, at(9, 30), 31).await;

        let conflicts = detector
            .find_conflicts(scope, provider, at(10, 0), 30, None)
            .await
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, existing.id);
        assert_eq!(conflicts[0].end_time(), at(10, 0) + Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_exclusion_ignores_own_booking() {
        let provider = Uuid::new_v4();
        let (detector, _, scope, existing) = seeded(provider, at(10, 0), 30).await;

        assert!(detector.has_conflict(scope, provider, at(10, 0), 30, None).await.unwrap());
        assert!(!detector
            .has_conflict(scope, provider, at(10, 0), 30, Some(existing.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_released_slots_and_other_scopes_never_conflict() {
        let provider = Uuid::new_v4();
        let (detector, store, scope, existing) = seeded(provider, at(10, 0), 60).await;

        assert!(!detector
            .has_conflict(TenantId::new(), provider, at(10, 0), 30, None)
            .await
            .unwrap());
        assert!(!detector
            .has_conflict(scope, Uuid::new_v4(), at(10, 0), 30, None)
            .await
            .unwrap());

        let mut no_show = AppointmentPatch::at(at(8, 0));
        no_show.status = Some(AppointmentStatus::NoShow);
        store.update_fields(scope, existing.id, no_show, None).await.unwrap();
        assert!(!detector.has_conflict(scope, provider, at(10, 0), 30, None).await.unwrap());
    }
}
