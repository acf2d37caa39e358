//! Appointment status state machine.
//!
//! ```text
//! scheduled   -> confirmed | cancelled | no_show
//! confirmed   -> in_progress | cancelled | no_show
//! in_progress -> completed | cancelled
//! completed, cancelled, no_show: terminal
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::directory::Directory;
use crate::error::{Result, SchedulingError, StorageError};
use crate::models::{Appointment, AppointmentStatus, StatusTransition, TenantId};
use crate::notify::{appointment_data, NotificationDispatcher, NotificationKind, OwnerNotification};
use crate::store::{AppointmentPatch, AppointmentStore};

use crate::models::AppointmentStatus::{Cancelled, Completed, Confirmed, InProgress, NoShow, Scheduled};

/// Statuses reachable from `from` in one step.
pub fn allowed_targets(from: AppointmentStatus) -> &'static [AppointmentStatus] {
    match from {
        Scheduled => &[Confirmed, Cancelled, NoShow],
        Confirmed => &[InProgress, Cancelled, NoShow],
        InProgress => &[Completed, Cancelled],
        Completed | Cancelled | NoShow => &[],
    }
}

pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Field changes that accompany a move into `target`.
fn transition_patch(
    target: AppointmentStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> AppointmentPatch {
    let mut patch = AppointmentPatch::at(now);
    patch.status = Some(target);
    match target {
        Confirmed => patch.confirmed_at = Some(now),
        InProgress => patch.started_at = Some(now),
        Completed => patch.completed_at = Some(now),
        Cancelled | NoShow => {
            patch.cancelled_at = Some(now);
            patch.cancel_reason = reason.map(str::to_string);
        }
        Scheduled => {}
    }
    patch
}

/// Validate and compute a transition without touching storage.
///
/// Returns the updated appointment and the audit record describing the change.
pub fn transition(
    appointment: &Appointment,
    target: AppointmentStatus,
    actor_id: Uuid,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Appointment, StatusTransition)> {
    if !can_transition(appointment.status, target) {
        return Err(SchedulingError::InvalidTransition {
            from: appointment.status,
            to: target,
        });
    }

    let mut updated = appointment.clone();
    transition_patch(target, reason, now).apply(&mut updated);

    let record = StatusTransition {
        id: Uuid::new_v4(),
        appointment_id: appointment.id,
        tenant_id: appointment.tenant_id,
        from_status: appointment.status,
        to_status: target,
        actor_id,
        reason: reason.map(str::to_string),
        created_at: now,
    };
    Ok((updated, record))
}

/// Which owner notification follows a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionNotice {
    /// One notification for confirmed and cancelled targets, none otherwise.
    Standard,
    /// Cancellation by the unconfirmed-appointment policy.
    AutoCancelled,
}

/// Executes transitions against the store.
#[derive(Clone)]
pub struct StatusWorkflow {
    store: Arc<dyn AppointmentStore>,
    directory: Arc<dyn Directory>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    max_attempts: u32,
}

impl StatusWorkflow {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        directory: Arc<dyn Directory>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
            clock,
            offset,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Load, validate and persist a transition, then record it and notify.
    pub async fn execute(
        &self,
        scope: TenantId,
        id: Uuid,
        target: AppointmentStatus,
        actor_id: Uuid,
        reason: Option<&str>,
        notice: TransitionNotice,
    ) -> Result<(Appointment, StatusTransition)> {
        let (updated, record) = self.persist(scope, id, target, actor_id, reason).await?;
        Ok(self.finish(updated, record, notice).await)
    }

    /// Like [`execute`](Self::execute), but the load and write must finish
    /// within `budget`.
    ///
    /// The audit record and the notification run outside the budget, so a
    /// transition that was stored is always recorded and announced.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_within(
        &self,
        budget: StdDuration,
        scope: TenantId,
        id: Uuid,
        target: AppointmentStatus,
        actor_id: Uuid,
        reason: Option<&str>,
        notice: TransitionNotice,
    ) -> Result<(Appointment, StatusTransition)> {
        let (updated, record) =
            tokio::time::timeout(budget, self.persist(scope, id, target, actor_id, reason))
                .await
                .map_err(|_| SchedulingError::timed_out(budget))??;
        Ok(self.finish(updated, record, notice).await)
    }

    /// A lost version race reloads the appointment and re-validates, so the
    /// transition is always judged against the latest stored status.
    async fn persist(
        &self,
        scope: TenantId,
        id: Uuid,
        target: AppointmentStatus,
        actor_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(Appointment, StatusTransition)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self
                .store
                .find_by_id(scope, id)
                .await?
                .ok_or_else(|| SchedulingError::not_found("Appointment", id))?;

            let now = self.clock.now();
            let (_, record) = transition(&current, target, actor_id, reason, now)?;
            let patch = transition_patch(target, reason, now);

            match self
                .store
                .update_fields(scope, id, patch, Some(current.version))
                .await
            {
                Ok(updated) => return Ok((updated, record)),
                Err(StorageError::VersionConflict { .. }) if attempt < self.max_attempts => {
                    debug!(appointment_id = %id, attempt, "Version race on status change, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn finish(
        &self,
        updated: Appointment,
        record: StatusTransition,
        notice: TransitionNotice,
    ) -> (Appointment, StatusTransition) {
        info!(
            appointment_id = %updated.id,
            from = %record.from_status,
            to = %record.to_status,
            actor = %record.actor_id,
            "Appointment status changed"
        );

        if let Err(e) = self.store.create_transition(record.clone()).await {
            warn!(appointment_id = %updated.id, error = %e, "Failed to record status transition");
        }

        self.notify(&updated, notice).await;
        (updated, record)
    }

    async fn notify(&self, appointment: &Appointment, notice: TransitionNotice) {
        let when = appointment.window().label(self.offset);
        let (kind, title, body) = match (notice, appointment.status) {
            (TransitionNotice::AutoCancelled, _) => (
                NotificationKind::AppointmentAutoCancelled,
                "Appointment cancelled".to_string(),
                format!(
                    "Your appointment on {} was cancelled because it was not confirmed in time.",
                    when
                ),
            ),
            (TransitionNotice::Standard, Confirmed) => (
                NotificationKind::AppointmentConfirmed,
                "Appointment confirmed".to_string(),
                format!("Your appointment on {} has been confirmed.", when),
            ),
            (TransitionNotice::Standard, Cancelled) => (
                NotificationKind::AppointmentCancelled,
                "Appointment cancelled".to_string(),
                match &appointment.cancel_reason {
                    Some(reason) => format!("Your appointment on {} was cancelled: {}", when, reason),
                    None => format!("Your appointment on {} was cancelled.", when),
                },
            ),
            _ => return,
        };

        let Some(owner_id) = resolve_owner(self.directory.as_ref(), appointment).await else {
            return;
        };
        self.dispatcher
            .to_owner(OwnerNotification {
                owner_id,
                tenant_id: appointment.tenant_id,
                kind,
                title,
                body,
                data: appointment_data(appointment),
                wants_push: true,
            })
            .await;
    }
}

/// Owner of the appointment's subject, if the directory can say.
pub(crate) async fn resolve_owner(
    directory: &dyn Directory,
    appointment: &Appointment,
) -> Option<Uuid> {
    match directory
        .find_subject(appointment.tenant_id, appointment.subject_id)
        .await
    {
        Ok(Some(subject)) => Some(subject.owner_id),
        Ok(None) => {
            warn!(
                appointment_id = %appointment.id,
                subject_id = %appointment.subject_id,
                "Subject missing, owner notification skipped"
            );
            None
        }
        Err(e) => {
            warn!(appointment_id = %appointment.id, error = %e, "Owner lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentType;
    use chrono::TimeZone;

    fn sample(status: AppointmentStatus) -> Appointment {
        let mut appointment = Appointment::scheduled(
            TenantId::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
            30,
            AppointmentType::Checkup,
            "Vaccination".to_string(),
            Utc.with_ymd_and_hms(2030, 1, 6, 10, 0, 0).unwrap(),
        );
        appointment.status = status;
        appointment
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        let now = Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap();
        let actor = Uuid::new_v4();
        for from in AppointmentStatus::ALL {
            for to in AppointmentStatus::ALL {
                let result = transition(&sample(from), to, actor, None, now);
                let expected = allowed_targets(from).contains(&to);
                assert_eq!(result.is_ok(), expected, "{} -> {}", from, to);
                if let Ok((updated, record)) = result {
                    assert_eq!(updated.status, to);
                    assert_eq!(record.from_status, from);
                    assert_eq!(record.to_status, to);
                    assert_eq!(record.actor_id, actor);
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_targets(status).is_empty());
        }
    }

    #[test]
    fn test_same_status_reentry_is_rejected() {
        let now = Utc::now();
        let err = transition(&sample(Confirmed), Confirmed, Uuid::nil(), None, now).unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::InvalidTransition { from: Confirmed, to: Confirmed }
        ));
    }

    #[test]
    fn test_timestamps_follow_target() {
        let now = Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap();
        let actor = Uuid::new_v4();

        let (confirmed, _) = transition(&sample(Scheduled), Confirmed, actor, None, now).unwrap();
        assert_eq!(confirmed.confirmed_at, Some(now));
        assert!(confirmed.cancelled_at.is_none());

        let (started, _) = transition(&confirmed, InProgress, actor, None, now).unwrap();
        assert_eq!(started.started_at, Some(now));

        let (done, _) = transition(&started, Completed, actor, None, now).unwrap();
        assert_eq!(done.completed_at, Some(now));
        assert!(done.cancel_reason.is_none());

        let (no_show, record) =
            transition(&sample(Confirmed), NoShow, actor, Some("did not arrive"), now).unwrap();
        assert_eq!(no_show.cancelled_at, Some(now));
        assert_eq!(no_show.cancel_reason.as_deref(), Some("did not arrive"));
        assert_eq!(record.reason.as_deref(), Some("did not arrive"));
    }
}
