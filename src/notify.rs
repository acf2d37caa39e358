//! Notification contract and dispatch.
//!
//! The engine never waits on delivery confirmation: every send is bounded by a
//! timeout, and failures are logged and dropped by [`NotificationDispatcher`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::models::{Appointment, TenantId};

/// Notification event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentCreated,
    AppointmentAssigned,
    AppointmentRequested,
    AppointmentRescheduled,
    AppointmentConfirmed,
    AppointmentCancelled,
    AppointmentAutoCancelled,
    AppointmentReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentCreated => "appointment.created",
            Self::AppointmentAssigned => "appointment.assigned",
            Self::AppointmentRequested => "appointment.requested",
            Self::AppointmentRescheduled => "appointment.rescheduled",
            Self::AppointmentConfirmed => "appointment.confirmed",
            Self::AppointmentCancelled => "appointment.cancelled",
            Self::AppointmentAutoCancelled => "appointment.auto_cancelled",
            Self::AppointmentReminder => "appointment.reminder",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staff target: one user or everyone in the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRecipient {
    User(Uuid),
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerNotification {
    pub owner_id: Uuid,
    pub tenant_id: TenantId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub wants_push: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffNotification {
    pub recipient: StaffRecipient,
    pub tenant_id: TenantId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Payload attached to every appointment notification.
pub fn appointment_data(appointment: &Appointment) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("appointment_id".to_string(), appointment.id.to_string());
    data.insert("subject_id".to_string(), appointment.subject_id.to_string());
    data.insert("start_time".to_string(), appointment.start_time.to_rfc3339());
    data.insert(
        "duration_minutes".to_string(),
        appointment.duration_minutes.to_string(),
    );
    data.insert("status".to_string(), appointment.status.to_string());
    if let Some(provider) = appointment.provider_id {
        data.insert("provider_id".to_string(), provider.to_string());
    }
    data
}

/// Delivery transport consumed by the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_to_owner(&self, notification: OwnerNotification) -> Result<(), NotifyError>;

    async fn send_to_staff(&self, notification: StaffNotification) -> Result<(), NotifyError>;
}

/// Writes every notification to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_to_owner(&self, notification: OwnerNotification) -> Result<(), NotifyError> {
        let data = serde_json::to_string(&notification.data)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(
            owner_id = %notification.owner_id,
            tenant = %notification.tenant_id,
            kind = %notification.kind,
            push = notification.wants_push,
            data = %data,
            "{}", notification.title
        );
        Ok(())
    }

    async fn send_to_staff(&self, notification: StaffNotification) -> Result<(), NotifyError> {
        let data = serde_json::to_string(&notification.data)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        info!(
            recipient = ?notification.recipient,
            tenant = %notification.tenant_id,
            kind = %notification.kind,
            data = %data,
            "{}", notification.title
        );
        Ok(())
    }
}

/// A sent notification, as captured by [`OutboxNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum SentNotification {
    Owner(OwnerNotification),
    Staff(StaffNotification),
}

impl SentNotification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            SentNotification::Owner(n) => n.kind,
            SentNotification::Staff(n) => n.kind,
        }
    }
}

/// Keeps every notification in memory, in send order.
#[derive(Default)]
pub struct OutboxNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn owner_messages(&self) -> Vec<OwnerNotification> {
        self.sent
            .lock()
            .iter()
            .filter_map(|n| match n {
                SentNotification::Owner(o) => Some(o.clone()),
                SentNotification::Staff(_) => None,
            })
            .collect()
    }

    pub fn staff_messages(&self) -> Vec<StaffNotification> {
        self.sent
            .lock()
            .iter()
            .filter_map(|n| match n {
                SentNotification::Staff(s) => Some(s.clone()),
                SentNotification::Owner(_) => None,
            })
            .collect()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|n| n.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send_to_owner(&self, notification: OwnerNotification) -> Result<(), NotifyError> {
        self.sent.lock().push(SentNotification::Owner(notification));
        Ok(())
    }

    async fn send_to_staff(&self, notification: StaffNotification) -> Result<(), NotifyError> {
        self.sent.lock().push(SentNotification::Staff(notification));
        Ok(())
    }
}

/// Fire-and-forget wrapper around a [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: StdDuration,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: StdDuration) -> Self {
        Self { notifier, timeout }
    }

    /// Send to an owner. Returns whether the notifier accepted it.
    pub async fn to_owner(&self, notification: OwnerNotification) -> bool {
        let kind = notification.kind;
        let owner_id = notification.owner_id;
        match tokio::time::timeout(self.timeout, self.notifier.send_to_owner(notification)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(%owner_id, %kind, error = %e, "Owner notification failed");
                false
            }
            Err(_) => {
                warn!(%owner_id, %kind, "Owner notification timed out");
                false
            }
        }
    }

    /// Send to staff. Returns whether the notifier accepted it.
    pub async fn to_staff(&self, notification: StaffNotification) -> bool {
        let kind = notification.kind;
        let recipient = notification.recipient;
        match tokio::time::timeout(self.timeout, self.notifier.send_to_staff(notification)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(?recipient, %kind, error = %e, "Staff notification failed");
                false
            }
            Err(_) => {
                warn!(?recipient, %kind, "Staff notification timed out");
                false
            }
        }
    }
}
