//! Appointment persistence contract and the in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::conflict::blocks;
use crate::error::StorageError;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentType, Page, Pagination,
    Priority, StatusTransition, TenantId, TimeRange,
};

pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Typed field update applied by [`AppointmentStore::update_fields`].
///
/// `None` leaves the stored value untouched. Outer `Option` on nullable
/// columns selects "touch", inner `Option` is the new value.
#[derive(Debug, Clone)]
pub struct AppointmentPatch {
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub provider_id: Option<Option<Uuid>>,
    pub appointment_type: Option<AppointmentType>,
    pub priority: Option<Priority>,
    pub reason: Option<String>,
    pub internal_notes: Option<Option<String>>,
    pub requester_notes: Option<Option<String>>,
    pub status: Option<AppointmentStatus>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub reminder_sent: Option<u32>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AppointmentPatch {
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            start_time: None,
            duration_minutes: None,
            provider_id: None,
            appointment_type: None,
            priority: None,
            reason: None,
            internal_notes: None,
            requester_notes: None,
            status: None,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            reminder_sent: None,
            deleted_at: None,
        }
    }

    /// Whether applying this patch can move the appointment's slot.
    pub fn moves_slot(&self) -> bool {
        self.start_time.is_some() || self.duration_minutes.is_some() || self.provider_id.is_some()
    }

    pub fn apply(&self, appointment: &mut Appointment) {
        appointment.updated_at = self.updated_at;
        if let Some(start) = self.start_time {
            appointment.start_time = start;
        }
        if let Some(duration) = self.duration_minutes {
            appointment.duration_minutes = duration;
        }
        if let Some(provider) = self.provider_id {
            appointment.provider_id = provider;
        }
        if let Some(kind) = self.appointment_type {
            appointment.appointment_type = kind;
        }
        if let Some(priority) = self.priority {
            appointment.priority = priority;
        }
        if let Some(reason) = &self.reason {
            appointment.reason = reason.clone();
        }
        if let Some(notes) = &self.internal_notes {
            appointment.internal_notes = notes.clone();
        }
        if let Some(notes) = &self.requester_notes {
            appointment.requester_notes = notes.clone();
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(at) = self.confirmed_at {
            appointment.confirmed_at = Some(at);
        }
        if let Some(at) = self.started_at {
            appointment.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            appointment.completed_at = Some(at);
        }
        if let Some(at) = self.cancelled_at {
            appointment.cancelled_at = Some(at);
        }
        if let Some(reason) = &self.cancel_reason {
            appointment.cancel_reason = Some(reason.clone());
        }
        if let Some(threshold) = self.reminder_sent {
            if !appointment.reminders_sent.contains(&threshold) {
                appointment.reminders_sent.push(threshold);
            }
        }
        if let Some(at) = self.deleted_at {
            appointment.deleted_at = Some(at);
        }
    }
}

/// Persistence contract consumed by the engine.
///
/// Implementations must reject a `create` or `update_fields` that would leave
/// two slot-holding appointments of one provider overlapping
/// ([`StorageError::SlotTaken`]), atomically with the write. Soft-deleted
/// appointments are invisible to every read.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert a new appointment. The stored copy carries `version = 1`.
    async fn create(&self, appointment: Appointment) -> StoreResult<Appointment>;

    async fn find_by_id(&self, scope: TenantId, id: Uuid) -> StoreResult<Option<Appointment>>;

    /// Apply `patch`. When `expected_version` is set the write only succeeds if
    /// the stored version still matches ([`StorageError::VersionConflict`]).
    async fn update_fields(
        &self,
        scope: TenantId,
        id: Uuid,
        patch: AppointmentPatch,
        expected_version: Option<u64>,
    ) -> StoreResult<Appointment>;

    async fn soft_delete(&self, scope: TenantId, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Every matching appointment in scope, ordered by start time.
    async fn find_all(
        &self,
        scope: TenantId,
        filter: &AppointmentFilter,
    ) -> StoreResult<Vec<Appointment>>;

    /// Slot-holding appointments of `provider_id` overlapping `window`.
    async fn check_conflicts(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        window: &TimeRange,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<Appointment>>;

    async fn create_transition(&self, transition: StatusTransition) -> StoreResult<()>;

    /// Transitions of one appointment, oldest first.
    async fn transition_history(&self, appointment_id: Uuid) -> StoreResult<Vec<StatusTransition>>;

    /// `scheduled` appointments created before `cutoff`, across all tenants.
    async fn find_unconfirmed_before(&self, cutoff: DateTime<Utc>)
        -> StoreResult<Vec<Appointment>>;

    /// Non-terminal appointments starting in `[from, from + within)`.
    /// `None` scope sweeps every tenant.
    async fn find_upcoming(
        &self,
        scope: Option<TenantId>,
        from: DateTime<Utc>,
        within: Duration,
    ) -> StoreResult<Vec<Appointment>>;

    async fn find(
        &self,
        scope: TenantId,
        filter: &AppointmentFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Appointment>> {
        let all = self.find_all(scope, filter).await?;
        Ok(Page::paginate(all, pagination))
    }

    async fn find_by_date_range(
        &self,
        scope: TenantId,
        range: &TimeRange,
    ) -> StoreResult<Vec<Appointment>> {
        let filter = AppointmentFilter {
            from: Some(range.start),
            until: Some(range.end),
            ..Default::default()
        };
        self.find_all(scope, &filter).await
    }

    async fn find_by_provider(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        range: Option<&TimeRange>,
    ) -> StoreResult<Vec<Appointment>> {
        let filter = AppointmentFilter {
            provider_id: Some(provider_id),
            from: range.map(|r| r.start),
            until: range.map(|r| r.end),
            ..Default::default()
        };
        self.find_all(scope, &filter).await
    }

    async fn find_by_subject(
        &self,
        scope: TenantId,
        subject_id: Uuid,
    ) -> StoreResult<Vec<Appointment>> {
        let filter = AppointmentFilter {
            subject_id: Some(subject_id),
            ..Default::default()
        };
        self.find_all(scope, &filter).await
    }

    async fn find_by_requester(
        &self,
        scope: TenantId,
        requester_id: Uuid,
    ) -> StoreResult<Vec<Appointment>> {
        let filter = AppointmentFilter {
            requester_id: Some(requester_id),
            ..Default::default()
        };
        self.find_all(scope, &filter).await
    }
}

#[derive(Default)]
struct StoreState {
    appointments: HashMap<Uuid, Appointment>,
    transitions: Vec<StatusTransition>,
}

impl StoreState {
    fn overlapping(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        window: &TimeRange,
        exclude: Option<Uuid>,
    ) -> Vec<Appointment> {
        let mut found: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| blocks(a, scope, provider_id, window, exclude))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.start_time);
        found
    }

    fn slot_taken(&self, candidate: &Appointment) -> Option<StorageError> {
        let provider_id = candidate.provider_id?;
        if !candidate.holds_slot() {
            return None;
        }
        let conflicts = self.overlapping(
            candidate.tenant_id,
            provider_id,
            &candidate.window(),
            Some(candidate.id),
        );
        if conflicts.is_empty() {
            None
        } else {
            Some(StorageError::SlotTaken {
                conflicts: conflicts.iter().map(Appointment::window).collect(),
            })
        }
    }
}

/// Single-process store. One write lock covers check-and-write, which is what
/// makes the overlap constraint hold under concurrent bookings.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    state: RwLock<StoreState>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of stored rows including soft-deleted ones.
    pub async fn len(&self) -> usize {
        self.state.read().await.appointments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn create(&self, mut appointment: Appointment) -> StoreResult<Appointment> {
        let mut state = self.state.write().await;
        if state.appointments.contains_key(&appointment.id) {
            return Err(StorageError::Internal(format!(
                "duplicate appointment id {}",
                appointment.id
            )));
        }
        if let Some(err) = state.slot_taken(&appointment) {
            return Err(err);
        }

        appointment.version = 1;
        state
            .appointments
            .insert(appointment.id, appointment.clone());
        debug!(appointment_id = %appointment.id, "Stored appointment");
        Ok(appointment)
    }

    async fn find_by_id(&self, scope: TenantId, id: Uuid) -> StoreResult<Option<Appointment>> {
        let state = self.state.read().await;
        Ok(state
            .appointments
            .get(&id)
            .filter(|a| a.tenant_id == scope && !a.is_deleted())
            .cloned())
    }

    async fn update_fields(
        &self,
        scope: TenantId,
        id: Uuid,
        patch: AppointmentPatch,
        expected_version: Option<u64>,
    ) -> StoreResult<Appointment> {
        let mut state = self.state.write().await;
        let current = state
            .appointments
            .get(&id)
            .filter(|a| a.tenant_id == scope && !a.is_deleted())
            .ok_or(StorageError::NotFound(id))?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(StorageError::VersionConflict {
                    id,
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut updated = current.clone();
        patch.apply(&mut updated);
        if patch.moves_slot() {
            if let Some(err) = state.slot_taken(&updated) {
                return Err(err);
            }
        }

        updated.version += 1;
        state.appointments.insert(id, updated.clone());
        Ok(updated)
    }

    async fn soft_delete(&self, scope: TenantId, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let appointment = state
            .appointments
            .get_mut(&id)
            .filter(|a| a.tenant_id == scope && !a.is_deleted())
            .ok_or(StorageError::NotFound(id))?;
        appointment.deleted_at = Some(at);
        appointment.updated_at = at;
        appointment.version += 1;
        Ok(())
    }

    async fn find_all(
        &self,
        scope: TenantId,
        filter: &AppointmentFilter,
    ) -> StoreResult<Vec<Appointment>> {
        let state = self.state.read().await;
        let mut found: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.tenant_id == scope && !a.is_deleted() && filter.matches(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.start_time, a.created_at));
        Ok(found)
    }

    async fn check_conflicts(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        window: &TimeRange,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<Appointment>> {
        let state = self.state.read().await;
        Ok(state.overlapping(scope, provider_id, window, exclude))
    }

    async fn create_transition(&self, transition: StatusTransition) -> StoreResult<()> {
        self.state.write().await.transitions.push(transition);
        Ok(())
    }

    async fn transition_history(&self, appointment_id: Uuid) -> StoreResult<Vec<StatusTransition>> {
        let state = self.state.read().await;
        let mut history: Vec<StatusTransition> = state
            .transitions
            .iter()
            .filter(|t| t.appointment_id == appointment_id)
            .cloned()
            .collect();
        history.sort_by_key(|t| t.created_at);
        Ok(history)
    }

    async fn find_unconfirmed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        let state = self.state.read().await;
        let mut found: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| {
                !a.is_deleted() && a.status == AppointmentStatus::Scheduled && a.created_at < cutoff
            })
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn find_upcoming(
        &self,
        scope: Option<TenantId>,
        from: DateTime<Utc>,
        within: Duration,
    ) -> StoreResult<Vec<Appointment>> {
        let window = TimeRange::between(from, from + within);
        let state = self.state.read().await;
        let mut found: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| {
                scope.map_or(true, |s| a.tenant_id == s)
                    && !a.is_deleted()
                    && !a.status.is_terminal()
                    && window.contains(&a.start_time)
            })
            .cloned()
            .collect();
        found.sort_by_key(|a| a.start_time);
        Ok(found)
    }
}
