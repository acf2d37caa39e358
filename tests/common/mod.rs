#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use easybook::store::{AppointmentPatch, StoreResult};
use easybook::{
    Appointment, AppointmentFilter, AppointmentStore, AppointmentType, BookingService,
    InMemoryAppointmentStore, InMemoryDirectory, ManualClock, NewAppointment, OutboxNotifier,
    Priority, SchedulingConfig, StatusTransition, StorageError, Subject, TenantId, TimeRange,
};

/// 2030-01-07 is a Monday.
pub fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 7, hour, minute, 0).unwrap()
}

pub fn tuesday(hour: u32, minute: u32) -> DateTime<Utc> {
    monday(hour, minute) + Duration::days(1)
}

/// Store wrapper that fails or stalls selected operations on demand.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryAppointmentStore,
    fail_transitions: AtomicBool,
    fail_updates_for: Mutex<HashSet<Uuid>>,
    transition_delay: Mutex<Option<StdDuration>>,
    update_delay: Mutex<Option<StdDuration>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_transition_writes(&self) {
        self.fail_transitions.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates_for(&self, id: Uuid) {
        self.fail_updates_for.lock().insert(id);
    }

    pub fn slow_transition_writes(&self, delay: StdDuration) {
        *self.transition_delay.lock() = Some(delay);
    }

    pub fn slow_updates(&self, delay: StdDuration) {
        *self.update_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl AppointmentStore for FaultyStore {
    async fn create(&self, appointment: Appointment) -> StoreResult<Appointment> {
        self.inner.create(appointment).await
    }

    async fn find_by_id(&self, scope: TenantId, id: Uuid) -> StoreResult<Option<Appointment>> {
        self.inner.find_by_id(scope, id).await
    }

    async fn update_fields(
        &self,
        scope: TenantId,
        id: Uuid,
        patch: AppointmentPatch,
        expected_version: Option<u64>,
    ) -> StoreResult<Appointment> {
        if self.fail_updates_for.lock().contains(&id) {
            return Err(StorageError::Unavailable("primary is down".to_string()));
        }
        let delay = *self.update_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.update_fields(scope, id, patch, expected_version).await
    }

    async fn soft_delete(&self, scope: TenantId, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.soft_delete(scope, id, at).await
    }

    async fn find_all(
        &self,
        scope: TenantId,
        filter: &AppointmentFilter,
    ) -> StoreResult<Vec<Appointment>> {
        self.inner.find_all(scope, filter).await
    }

    async fn check_conflicts(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        window: &TimeRange,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<Appointment>> {
        self.inner
            .check_conflicts(scope, provider_id, window, exclude)
            .await
    }

    async fn create_transition(&self, transition: StatusTransition) -> StoreResult<()> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("audit table locked".to_string()));
        }
        let delay = *self.transition_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.create_transition(transition).await
    }

    async fn transition_history(&self, appointment_id: Uuid) -> StoreResult<Vec<StatusTransition>> {
        self.inner.transition_history(appointment_id).await
    }

    async fn find_unconfirmed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Appointment>> {
        self.inner.find_unconfirmed_before(cutoff).await
    }

    async fn find_upcoming(
        &self,
        scope: Option<TenantId>,
        from: DateTime<Utc>,
        within: Duration,
    ) -> StoreResult<Vec<Appointment>> {
        self.inner.find_upcoming(scope, from, within).await
    }
}

pub struct TestEnv {
    pub service: Arc<BookingService>,
    pub store: Arc<FaultyStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub outbox: Arc<OutboxNotifier>,
    pub clock: ManualClock,
    pub scope: TenantId,
    pub staff: Uuid,
    pub provider: Uuid,
    pub subject: Subject,
}

impl TestEnv {
    /// Fresh environment with the clock at Monday 08:00 UTC.
    pub fn new() -> Self {
        Self::with_config(SchedulingConfig::default())
    }

    pub fn with_config(config: SchedulingConfig) -> Self {
        let scope = TenantId::new();
        let provider = Uuid::new_v4();
        let store = Arc::new(FaultyStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let outbox = Arc::new(OutboxNotifier::new());
        let clock = ManualClock::new(monday(8, 0));

        directory.add_provider(scope, provider);
        let subject = Subject {
            id: Uuid::new_v4(),
            tenant_id: scope,
            owner_id: Uuid::new_v4(),
            name: "Bella".to_string(),
        };
        directory.add_subject(subject.clone());

        let service = BookingService::new(
            store.clone(),
            directory.clone(),
            outbox.clone(),
            Arc::new(clock.clone()),
            config,
        )
        .expect("valid config");

        TestEnv {
            service: Arc::new(service),
            store,
            directory,
            outbox,
            clock,
            scope,
            staff: Uuid::new_v4(),
            provider,
            subject,
        }
    }

    pub fn add_subject(&self, name: &str) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4(),
            tenant_id: self.scope,
            owner_id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.directory.add_subject(subject.clone());
        subject
    }

    pub fn add_provider(&self) -> Uuid {
        let provider = Uuid::new_v4();
        self.directory.add_provider(self.scope, provider);
        provider
    }

    pub fn booking(&self, start: DateTime<Utc>, duration_minutes: u32) -> NewAppointment {
        NewAppointment {
            subject_id: self.subject.id,
            provider_id: Some(self.provider),
            start_time: start,
            duration_minutes,
            appointment_type: AppointmentType::Consultation,
            priority: Priority::Normal,
            reason: "Routine visit".to_string(),
            internal_notes: None,
            requester_notes: None,
        }
    }

    pub async fn book(&self, start: DateTime<Utc>, duration_minutes: u32) -> Appointment {
        self.service
            .create(self.scope, self.staff, self.booking(start, duration_minutes))
            .await
            .expect("booking should succeed")
    }
}
