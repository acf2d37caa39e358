//! Booking orchestration.
//!
//! [`BookingService`] is the single entry point for every appointment
//! operation. It validates requests against [`SchedulingConfig`], consults the
//! [`ConflictDetector`], writes through the [`AppointmentStore`] and routes
//! every status change through the [`StatusWorkflow`].

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::CalendarView;
use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::conflict::{blocks, ConflictDetector};
use crate::directory::{Directory, Subject};
use crate::error::{ConfigError, Result, SchedulingError, StorageError};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentUpdate, NewAppointment, Page,
    Pagination, StatusTransition, SubjectAppointmentRequest, TenantId, TimeRange, SYSTEM_ACTOR,
};
use crate::notify::{
    appointment_data, NotificationDispatcher, NotificationKind, Notifier, OwnerNotification,
    StaffNotification, StaffRecipient,
};
use crate::store::{AppointmentPatch, AppointmentStore};
use crate::workflow::{resolve_owner, StatusWorkflow, TransitionNotice};

/// One of the provider's bookings near a proposed slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusySlot {
    pub appointment_id: Uuid,
    pub range: TimeRange,
    /// Local-time rendering, e.g. `2030-01-07 10:00 - 10:30`.
    pub label: String,
    pub status: AppointmentStatus,
}

/// Result of [`BookingService::check_availability`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<TimeRange>,
    pub busy: Vec<BusySlot>,
}

pub struct BookingService {
    store: Arc<dyn AppointmentStore>,
    directory: Arc<dyn Directory>,
    detector: ConflictDetector,
    workflow: StatusWorkflow,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
    offset: FixedOffset,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let offset = config.business_hours.offset().ok_or_else(|| {
            ConfigError::Invalid("business_hours.utc_offset_minutes is out of range".to_string())
        })?;

        let dispatcher = NotificationDispatcher::new(notifier, config.booking.notification_timeout());
        let workflow = StatusWorkflow::new(
            store.clone(),
            directory.clone(),
            dispatcher.clone(),
            clock.clone(),
            offset,
            config.booking.max_write_attempts,
        );

        Ok(Self {
            detector: ConflictDetector::new(store.clone()),
            store,
            directory,
            workflow,
            dispatcher,
            clock,
            config,
            offset,
        })
    }

    pub fn store(&self) -> &Arc<dyn AppointmentStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Book an appointment on behalf of `actor_id`, who becomes its requester.
    pub async fn create(
        &self,
        scope: TenantId,
        actor_id: Uuid,
        request: NewAppointment,
    ) -> Result<Appointment> {
        let now = self.clock.now();
        self.validate_duration(request.duration_minutes)?;
        self.validate_reason(&request.reason)?;
        self.validate_start(request.start_time, now)?;

        let subject = self.require_subject(scope, request.subject_id).await?;
        if let Some(provider_id) = request.provider_id {
            self.require_provider(scope, provider_id).await?;
            self.ensure_free(
                scope,
                provider_id,
                request.start_time,
                request.duration_minutes,
                None,
            )
            .await?;
        }

        let mut appointment = Appointment::scheduled(
            scope,
            subject.id,
            actor_id,
            request.provider_id,
            request.start_time,
            request.duration_minutes,
            request.appointment_type,
            request.reason,
            now,
        );
        appointment.priority = request.priority;
        appointment.internal_notes = request.internal_notes;
        appointment.requester_notes = request.requester_notes;

        let created = self.store.create(appointment).await?;
        info!(
            appointment_id = %created.id,
            tenant = %scope,
            provider_id = ?created.provider_id,
            start = %created.start_time,
            "Appointment created"
        );

        let when = self.describe(&created);
        self.notify_owner(
            subject.owner_id,
            &created,
            NotificationKind::AppointmentCreated,
            "Appointment booked",
            format!("An appointment for {} is booked on {}.", subject.name, when),
            false,
        )
        .await;
        if let Some(provider_id) = created.provider_id {
            self.notify_staff(
                StaffRecipient::User(provider_id),
                &created,
                NotificationKind::AppointmentAssigned,
                "New appointment assigned",
                format!("You have been assigned an appointment on {}.", when),
            )
            .await;
        }

        Ok(created)
    }

    pub async fn get(&self, scope: TenantId, id: Uuid) -> Result<Appointment> {
        self.store
            .find_by_id(scope, id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", id))
    }

    pub async fn list(
        &self,
        scope: TenantId,
        filter: &AppointmentFilter,
        pagination: Pagination,
    ) -> Result<Page<Appointment>> {
        Ok(self.store.find(scope, filter, pagination).await?)
    }

    /// Appointments booked by `requester_id`, ordered by start time.
    pub async fn list_for_requester(
        &self,
        scope: TenantId,
        requester_id: Uuid,
        pagination: Pagination,
    ) -> Result<Page<Appointment>> {
        let all = self.store.find_by_requester(scope, requester_id).await?;
        Ok(Page::paginate(all, pagination))
    }

    /// Change time, duration, provider or descriptive fields.
    ///
    /// Only fields set in `update` are touched; `Some(None)` unassigns the
    /// provider or clears a note. Moving the slot re-runs the
    /// business-hours and conflict checks with the appointment itself
    /// excluded. Terminal appointments cannot be rescheduled.
    pub async fn reschedule(
        &self,
        scope: TenantId,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment> {
        if let Some(duration) = update.duration_minutes {
            self.validate_duration(duration)?;
        }
        if let Some(reason) = &update.reason {
            self.validate_reason(reason)?;
        }

        let max_attempts = self.config.booking.max_write_attempts;
        let mut attempt = 0;
        let (previous, updated) = loop {
            attempt += 1;
            let current = self.get(scope, id).await?;
            if current.status.is_terminal() {
                return Err(SchedulingError::validation(
                    "status",
                    format!("a {} appointment cannot be rescheduled", current.status),
                ));
            }

            let now = self.clock.now();
            let start = update.start_time.unwrap_or(current.start_time);
            let duration = update.duration_minutes.unwrap_or(current.duration_minutes);
            if update.start_time.is_some() {
                self.validate_start(start, now)?;
            } else if update.duration_minutes.is_some() {
                self.validate_business_hours(start)?;
            }

            if let Some(Some(provider_id)) = update.provider_id {
                if current.provider_id != Some(provider_id) {
                    self.require_provider(scope, provider_id).await?;
                }
            }
            if update.touches_schedule() {
                if let Some(provider_id) = update.provider_id.unwrap_or(current.provider_id) {
                    self.ensure_free(scope, provider_id, start, duration, Some(id))
                        .await?;
                }
            }

            let mut patch = AppointmentPatch::at(now);
            patch.start_time = update.start_time;
            patch.duration_minutes = update.duration_minutes;
            patch.provider_id = update.provider_id;
            patch.appointment_type = update.appointment_type;
            patch.priority = update.priority;
            patch.reason = update.reason.clone();
            patch.internal_notes = update.internal_notes.clone();
            patch.requester_notes = update.requester_notes.clone();

            match self
                .store
                .update_fields(scope, id, patch, Some(current.version))
                .await
            {
                Ok(updated) => break (current, updated),
                Err(StorageError::VersionConflict { .. }) if attempt < max_attempts => {
                    debug!(appointment_id = %id, attempt, "Version race on reschedule, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(
            appointment_id = %id,
            tenant = %scope,
            start = %updated.start_time,
            duration = updated.duration_minutes,
            provider_id = ?updated.provider_id,
            "Appointment updated"
        );

        let when = self.describe(&updated);
        if let Some(provider_id) = updated.provider_id {
            if previous.provider_id != Some(provider_id) {
                self.notify_staff(
                    StaffRecipient::User(provider_id),
                    &updated,
                    NotificationKind::AppointmentAssigned,
                    "New appointment assigned",
                    format!("You have been assigned an appointment on {}.", when),
                )
                .await;
            }
        }
        if previous.window() != updated.window() {
            if let Some(owner_id) = resolve_owner(self.directory.as_ref(), &updated).await {
                self.notify_owner(
                    owner_id,
                    &updated,
                    NotificationKind::AppointmentRescheduled,
                    "Appointment rescheduled",
                    format!("Your appointment has moved to {}.", when),
                    true,
                )
                .await;
            }
        }

        Ok(updated)
    }

    /// Staff-driven status change. Re-entering the current status is rejected.
    pub async fn change_status(
        &self,
        scope: TenantId,
        id: Uuid,
        target: AppointmentStatus,
        actor_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Appointment> {
        let (updated, _) = self
            .workflow
            .execute(scope, id, target, actor_id, reason, TransitionNotice::Standard)
            .await?;
        Ok(updated)
    }

    /// Hide an appointment from every query. History is kept.
    pub async fn delete(&self, scope: TenantId, id: Uuid, actor_id: Uuid) -> Result<()> {
        self.store.soft_delete(scope, id, self.clock.now()).await?;
        info!(appointment_id = %id, tenant = %scope, actor = %actor_id, "Appointment deleted");
        Ok(())
    }

    /// Read-only availability check for a proposed slot.
    ///
    /// Alongside the blocking conflicts, lists the provider's slot-holding
    /// bookings within the configured window around the slot.
    pub async fn check_availability(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Uuid>,
    ) -> Result<Availability> {
        self.validate_duration(duration_minutes)?;

        let conflicts = self
            .detector
            .find_conflicts(scope, provider_id, start, duration_minutes, exclude)
            .await?;

        let nearby = TimeRange::new(start, duration_minutes)
            .padded(self.config.booking.availability_window_minutes);
        let mut busy: Vec<BusySlot> = self
            .store
            .check_conflicts(scope, provider_id, &nearby, exclude)
            .await?
            .into_iter()
            .filter(|a| blocks(a, scope, provider_id, &nearby, exclude))
            .map(|a| BusySlot {
                appointment_id: a.id,
                range: a.window(),
                label: a.window().label(self.offset),
                status: a.status,
            })
            .collect();
        busy.sort_by_key(|slot| slot.range.start);

        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts: conflicts.iter().map(Appointment::window).collect(),
            busy,
        })
    }

    /// Booking request made by the subject's owner.
    ///
    /// The appointment starts unassigned with the default duration and staff
    /// are told about it instead of the owner.
    pub async fn request_from_subject(
        &self,
        scope: TenantId,
        requester_id: Uuid,
        request: SubjectAppointmentRequest,
    ) -> Result<Appointment> {
        require_requester(requester_id)?;
        let now = self.clock.now();
        self.validate_reason(&request.reason)?;
        self.validate_start(request.start_time, now)?;

        let subject = self.require_subject(scope, request.subject_id).await?;
        ensure_owner(&subject, requester_id)?;

        let mut appointment = Appointment::scheduled(
            scope,
            subject.id,
            requester_id,
            None,
            request.start_time,
            self.config.booking.default_duration_minutes,
            request.appointment_type,
            request.reason,
            now,
        );
        appointment.requester_notes = request.requester_notes;

        let created = self.store.create(appointment).await?;
        info!(
            appointment_id = %created.id,
            tenant = %scope,
            requester = %requester_id,
            "Appointment requested"
        );

        let when = self.describe(&created);
        self.notify_staff(
            StaffRecipient::Broadcast,
            &created,
            NotificationKind::AppointmentRequested,
            "New appointment request",
            format!("{} requested an appointment on {}.", subject.name, when),
        )
        .await;

        Ok(created)
    }

    /// Cancellation by the subject's owner.
    ///
    /// Cancelling an already cancelled appointment returns it unchanged and
    /// records nothing.
    pub async fn cancel_from_subject(
        &self,
        scope: TenantId,
        id: Uuid,
        requester_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Appointment> {
        require_requester(requester_id)?;
        let current = self.get(scope, id).await?;
        let subject = self.require_subject(scope, current.subject_id).await?;
        ensure_owner(&subject, requester_id)?;

        if current.status == AppointmentStatus::Cancelled {
            debug!(appointment_id = %id, "Appointment already cancelled");
            return Ok(current);
        }

        let (updated, _) = self
            .workflow
            .execute(
                scope,
                id,
                AppointmentStatus::Cancelled,
                requester_id,
                reason,
                TransitionNotice::Standard,
            )
            .await?;
        Ok(updated)
    }

    pub async fn calendar_view(
        &self,
        scope: TenantId,
        range: TimeRange,
        provider_id: Option<Uuid>,
    ) -> Result<CalendarView> {
        let appointments = match provider_id {
            Some(provider_id) => {
                self.store
                    .find_by_provider(scope, provider_id, Some(&range))
                    .await?
            }
            None => self.store.find_by_date_range(scope, &range).await?,
        };
        Ok(CalendarView::build(range, provider_id, appointments, self.offset))
    }

    /// Transition records for an appointment, oldest first.
    pub async fn status_history(&self, scope: TenantId, id: Uuid) -> Result<Vec<StatusTransition>> {
        self.get(scope, id).await?;
        Ok(self.store.transition_history(id).await?)
    }

    /// Cancel an appointment that was never confirmed in time.
    ///
    /// The status write is bounded by the per-item sweep budget. Once it is
    /// stored, the audit record and the owner notification always follow.
    pub async fn auto_cancel(&self, appointment: &Appointment) -> Result<Appointment> {
        let (updated, _) = self
            .workflow
            .execute_within(
                self.config.reminders.item_timeout(),
                appointment.tenant_id,
                appointment.id,
                AppointmentStatus::Cancelled,
                SYSTEM_ACTOR,
                Some(self.config.reminders.auto_cancel_reason.as_str()),
                TransitionNotice::AutoCancelled,
            )
            .await?;
        Ok(updated)
    }

    /// Send the reminder for `threshold_hours`, at most once per threshold.
    ///
    /// The marker is claimed with a versioned write before the notification
    /// goes out, so two overlapping sweeps cannot both send it. Only the claim
    /// is bounded by the per-item sweep budget; a claimed reminder is always
    /// sent. Returns `false` when the reminder had already been sent.
    pub async fn send_reminder(
        &self,
        appointment: &Appointment,
        threshold_hours: u32,
    ) -> Result<bool> {
        let budget = self.config.reminders.item_timeout();
        let claimed = tokio::time::timeout(budget, self.claim_reminder(appointment, threshold_hours))
            .await
            .map_err(|_| SchedulingError::timed_out(budget))??;
        let Some(claimed) = claimed else {
            return Ok(false);
        };

        if let Some(owner_id) = resolve_owner(self.directory.as_ref(), &claimed).await {
            self.notify_owner(
                owner_id,
                &claimed,
                NotificationKind::AppointmentReminder,
                "Appointment reminder",
                format!(
                    "Reminder: your {} appointment is in {} hours ({}).",
                    claimed.appointment_type.as_str(),
                    threshold_hours,
                    self.describe(&claimed)
                ),
                true,
            )
            .await;
        }
        info!(appointment_id = %claimed.id, threshold_hours, "Reminder sent");
        Ok(true)
    }

    /// Set the marker for `threshold_hours`. `None` if it was already set.
    async fn claim_reminder(
        &self,
        appointment: &Appointment,
        threshold_hours: u32,
    ) -> Result<Option<Appointment>> {
        let scope = appointment.tenant_id;
        let max_attempts = self.config.booking.max_write_attempts;
        let mut current = appointment.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if current.reminder_sent(threshold_hours) {
                return Ok(None);
            }

            let mut patch = AppointmentPatch::at(self.clock.now());
            patch.reminder_sent = Some(threshold_hours);
            match self
                .store
                .update_fields(scope, current.id, patch, Some(current.version))
                .await
            {
                Ok(updated) => return Ok(Some(updated)),
                Err(StorageError::VersionConflict { .. }) if attempt < max_attempts => {
                    current = self.get(scope, current.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn validate_duration(&self, minutes: u32) -> Result<()> {
        let booking = &self.config.booking;
        if minutes < booking.min_duration_minutes || minutes > booking.max_duration_minutes {
            return Err(SchedulingError::validation(
                "duration_minutes",
                format!(
                    "must be between {} and {} minutes, got {}",
                    booking.min_duration_minutes, booking.max_duration_minutes, minutes
                ),
            ));
        }
        Ok(())
    }

    fn validate_reason(&self, reason: &str) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(SchedulingError::validation("reason", "must not be empty"));
        }
        let max = self.config.booking.max_reason_length;
        if reason.chars().count() > max {
            return Err(SchedulingError::validation(
                "reason",
                format!("must be at most {} characters", max),
            ));
        }
        Ok(())
    }

    fn validate_start(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if start <= now {
            return Err(SchedulingError::validation(
                "start_time",
                "must be in the future",
            ));
        }
        self.validate_business_hours(start)
    }

    /// The start hour must fall in `[start_hour, end_hour)` on an open day,
    /// evaluated at the configured offset.
    fn validate_business_hours(&self, start: DateTime<Utc>) -> Result<()> {
        let hours = &self.config.business_hours;
        let local = start.with_timezone(&self.offset);
        if hours.is_closed_on(local.weekday()) {
            return Err(SchedulingError::validation(
                "start_time",
                format!("bookings are not taken on {}", local.weekday()),
            ));
        }
        if local.hour() < hours.start_hour || local.hour() >= hours.end_hour {
            return Err(SchedulingError::validation(
                "start_time",
                format!(
                    "must be within business hours {:02}:00-{:02}:00",
                    hours.start_hour, hours.end_hour
                ),
            ));
        }
        Ok(())
    }

    async fn require_subject(&self, scope: TenantId, subject_id: Uuid) -> Result<Subject> {
        self.directory
            .find_subject(scope, subject_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Subject", subject_id))
    }

    async fn require_provider(&self, scope: TenantId, provider_id: Uuid) -> Result<()> {
        if !self.directory.provider_exists(scope, provider_id).await? {
            return Err(SchedulingError::not_found("Provider", provider_id));
        }
        Ok(())
    }

    async fn ensure_free(
        &self,
        scope: TenantId,
        provider_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        let conflicts = self
            .detector
            .find_conflicts(scope, provider_id, start, duration_minutes, exclude)
            .await?;
        if conflicts.is_empty() {
            return Ok(());
        }

        let taken: Vec<String> = conflicts
            .iter()
            .map(|a| a.window().label(self.offset))
            .collect();
        Err(SchedulingError::Conflict {
            message: format!("provider is already booked at {}", taken.join(", ")),
            conflicts: conflicts.iter().map(Appointment::window).collect(),
        })
    }

    fn describe(&self, appointment: &Appointment) -> String {
        appointment.window().label(self.offset)
    }

    async fn notify_owner(
        &self,
        owner_id: Uuid,
        appointment: &Appointment,
        kind: NotificationKind,
        title: &str,
        body: String,
        wants_push: bool,
    ) {
        self.dispatcher
            .to_owner(OwnerNotification {
                owner_id,
                tenant_id: appointment.tenant_id,
                kind,
                title: title.to_string(),
                body,
                data: appointment_data(appointment),
                wants_push,
            })
            .await;
    }

    async fn notify_staff(
        &self,
        recipient: StaffRecipient,
        appointment: &Appointment,
        kind: NotificationKind,
        title: &str,
        body: String,
    ) {
        self.dispatcher
            .to_staff(StaffNotification {
                recipient,
                tenant_id: appointment.tenant_id,
                kind,
                title: title.to_string(),
                body,
                data: appointment_data(appointment),
            })
            .await;
    }
}

/// Subject-side calls must come from a real user, never the system actor.
fn require_requester(requester_id: Uuid) -> Result<()> {
    if requester_id == SYSTEM_ACTOR {
        return Err(SchedulingError::Unauthorized(
            "subject-side operations require a signed-in requester".to_string(),
        ));
    }
    Ok(())
}

fn ensure_owner(subject: &Subject, requester_id: Uuid) -> Result<()> {
    if subject.owner_id != requester_id {
        return Err(SchedulingError::OwnershipMismatch(format!(
            "subject {} does not belong to {}",
            subject.id, requester_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use crate::models::AppointmentType;
    use crate::notify::OutboxNotifier;
    use crate::store::InMemoryAppointmentStore;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        service: BookingService,
        clock: ManualClock,
        outbox: Arc<OutboxNotifier>,
        scope: TenantId,
        subject: Subject,
        provider: Uuid,
        staff: Uuid,
    }

    // 2030-01-07 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, day, hour, minute, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let scope = TenantId::new();
        let directory = Arc::new(InMemoryDirectory::new());
        let subject = Subject {
            id: Uuid::new_v4(),
            tenant_id: scope,
            owner_id: Uuid::new_v4(),
            name: "Bella".to_string(),
        };
        let provider = Uuid::new_v4();
        directory.add_subject(subject.clone());
        directory.add_provider(scope, provider);

        let clock = ManualClock::new(at(7, 8, 0));
        let outbox = Arc::new(OutboxNotifier::new());
        let service = BookingService::new(
            Arc::new(InMemoryAppointmentStore::new()),
            directory,
            outbox.clone(),
            Arc::new(clock.clone()),
            SchedulingConfig::default(),
        )
        .unwrap();

        Fixture {
            service,
            clock,
            outbox,
            scope,
            subject,
            provider,
            staff: Uuid::new_v4(),
        }
    }

    fn request(f: &Fixture, start: DateTime<Utc>) -> NewAppointment {
        NewAppointment {
            subject_id: f.subject.id,
            provider_id: Some(f.provider),
            start_time: start,
            duration_minutes: 30,
            appointment_type: AppointmentType::Consultation,
            priority: Default::default(),
            reason: "Annual check".to_string(),
            internal_notes: None,
            requester_notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_notifies_owner_and_provider() {
        let f = fixture();
        let created = f.service.create(f.scope, f.staff, request(&f, at(7, 10, 0))).await.unwrap();

        assert_eq!(created.status, AppointmentStatus::Scheduled);
        assert_eq!(created.requester_id, f.staff);
        assert_eq!(created.version, 1);
        let owner = f.outbox.owner_messages();
        assert_eq!(owner.len(), 1);
        assert_eq!(owner[0].owner_id, f.subject.owner_id);
        assert_eq!(owner[0].kind, NotificationKind::AppointmentCreated);
        let staff = f.outbox.staff_messages();
        assert_eq!(staff.len(), 1);
        assert_eq!(staff[0].recipient, StaffRecipient::User(f.provider));
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let f = fixture();

        let mut short = request(&f, at(7, 10, 0));
        short.duration_minutes = 10;
        let err = f.service.create(f.scope, f.staff, short).await.unwrap_err();
        assert!(matches!(err, SchedulingError::Validation { field: "duration_minutes", .. }));

        let mut blank = request(&f, at(7, 10, 0));
        blank.reason = "   ".to_string();
        let err = f.service.create(f.scope, f.staff, blank).await.unwrap_err();
        assert!(matches!(err, SchedulingError::Validation { field: "reason", .. }));

        let err = f.service.create(f.scope, f.staff, request(&f, at(7, 7, 0))).await.unwrap_err();
        assert!(matches!(err, SchedulingError::Validation { field: "start_time", .. }));

        let err = f.service.create(f.scope, f.staff, request(&f, at(7, 18, 0))).await.unwrap_err();
        assert!(matches!(err, SchedulingError::Validation { field: "start_time", .. }));

        // Sunday
        let err = f.service.create(f.scope, f.staff, request(&f, at(13, 10, 0))).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let mut stranger = request(&f, at(7, 10, 0));
        stranger.provider_id = Some(Uuid::new_v4());
        let err = f.service.create(f.scope, f.staff, stranger).await.unwrap_err();
        assert!(matches!(err, SchedulingError::NotFound { entity: "Provider", .. }));
    }

    #[tokio::test]
    async fn test_last_bookable_hour_is_accepted() {
        let f = fixture();
        assert!(f.service.create(f.scope, f.staff, request(&f, at(7, 17, 45))).await.is_ok());
    }

    #[tokio::test]
    async fn test_reschedule_moves_slot_and_notifies() {
        let f = fixture();
        let created = f.service.create(f.scope, f.staff, request(&f, at(7, 10, 0))).await.unwrap();
        f.outbox.clear();

        let moved = f
            .service
            .reschedule(
                f.scope,
                created.id,
                AppointmentUpdate {
                    start_time: Some(at(7, 10, 15)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(moved.start_time, at(7, 10, 15));
        assert_eq!(moved.reason, created.reason);
        assert_eq!(f.outbox.count_of(NotificationKind::AppointmentRescheduled), 1);
        assert_eq!(f.outbox.count_of(NotificationKind::AppointmentAssigned), 0);
    }

    #[tokio::test]
    async fn test_reschedule_rejects_terminal_appointments() {
        let f = fixture();
        let created = f.service.create(f.scope, f.staff, request(&f, at(7, 10, 0))).await.unwrap();
        f.service
            .change_status(f.scope, created.id, AppointmentStatus::Cancelled, f.staff, None)
            .await
            .unwrap();

        let err = f
            .service
            .reschedule(
                f.scope,
                created.id,
                AppointmentUpdate {
                    reason: Some("Changed mind".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Validation { field: "status", .. }));
    }

    #[tokio::test]
    async fn test_subject_request_is_unassigned_and_broadcast() {
        let f = fixture();
        let created = f
            .service
            .request_from_subject(
                f.scope,
                f.subject.owner_id,
                SubjectAppointmentRequest {
                    subject_id: f.subject.id,
                    start_time: at(8, 9, 0),
                    appointment_type: AppointmentType::Checkup,
                    reason: "Limping".to_string(),
                    requester_notes: Some("Mornings only".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(created.provider_id.is_none());
        assert_eq!(created.duration_minutes, 30);
        assert_eq!(created.requester_id, f.subject.owner_id);
        let staff = f.outbox.staff_messages();
        assert_eq!(staff.len(), 1);
        assert_eq!(staff[0].recipient, StaffRecipient::Broadcast);
        assert!(f.outbox.owner_messages().is_empty());
    }

    #[tokio::test]
    async fn test_availability_lists_nearby_bookings() {
        let f = fixture();
        f.service.create(f.scope, f.staff, request(&f, at(7, 10, 0))).await.unwrap();
        f.service.create(f.scope, f.staff, request(&f, at(7, 11, 0))).await.unwrap();
        f.service.create(f.scope, f.staff, request(&f, at(7, 14, 0))).await.unwrap();

        let check = f
            .service
            .check_availability(f.scope, f.provider, at(7, 10, 30), 30, None)
            .await
            .unwrap();
        assert!(check.available);
        assert!(check.conflicts.is_empty());
        let labels: Vec<&str> = check.busy.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2030-01-07 10:00 - 10:30", "2030-01-07 11:00 - 11:30"]);

        let check = f
            .service
            .check_availability(f.scope, f.provider, at(7, 10, 15), 30, None)
            .await
            .unwrap();
        assert!(!check.available);
        assert_eq!(check.conflicts, vec![TimeRange::new(at(7, 10, 0), 30)]);
    }

    #[tokio::test]
    async fn test_history_hidden_after_delete() {
        let f = fixture();
        let created = f.service.create(f.scope, f.staff, request(&f, at(7, 10, 0))).await.unwrap();
        f.service
            .change_status(f.scope, created.id, AppointmentStatus::Confirmed, f.staff, None)
            .await
            .unwrap();
        assert_eq!(f.service.status_history(f.scope, created.id).await.unwrap().len(), 1);

        f.service.delete(f.scope, created.id, f.staff).await.unwrap();
        let err = f.service.status_history(f.scope, created.id).await.unwrap_err();
        assert!(matches!(err, SchedulingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reminder_is_sent_once_per_threshold() {
        let f = fixture();
        let created = f.service.create(f.scope, f.staff, request(&f, at(8, 10, 0))).await.unwrap();
        f.clock.advance(Duration::hours(2));

        assert!(f.service.send_reminder(&created, 24).await.unwrap());
        // Stale copy: the stored marker still wins.
        assert!(!f.service.send_reminder(&created, 24).await.unwrap());
        assert_eq!(f.outbox.count_of(NotificationKind::AppointmentReminder), 1);

        let stored = f.service.get(f.scope, created.id).await.unwrap();
        assert_eq!(stored.reminders_sent, vec![24]);
    }
}
