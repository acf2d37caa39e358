/// Data models for the appointment booking engine.
///
/// This module defines the core data structures used throughout the system:
/// - Priority, AppointmentType, AppointmentStatus: classification enums
/// - TimeRange: half-open booking windows and their overlap rule
/// - Appointment: the central booking record
/// - StatusTransition: append-only audit row for every status change
/// - NewAppointment / SubjectAppointmentRequest / AppointmentUpdate: inputs
/// - AppointmentFilter / Pagination / Page: typed list queries

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Actor id recorded on transitions performed by the engine itself.
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Isolation boundary: one organization's appointments are invisible to another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        TenantId(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority levels for appointments.
///
/// Higher numeric values indicate higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Emergency = 4,
}

impl Priority {
    /// Convert a string to a Priority enum value.
    pub fn from_string(value: &str) -> Result<Self, String> {
        match value.to_lowercase().trim() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "emergency" => Ok(Priority::Emergency),
            _ => Err(format!(
                "Invalid priority: '{}'. Must be one of: low, normal, high, emergency",
                value
            )),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Emergency => "EMERGENCY",
        }
    }
}

/// Kind of service being booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Consultation,
    Procedure,
    Preventive,
    Emergency,
    Checkup,
    Other,
}

impl AppointmentType {
    pub fn from_string(value: &str) -> Result<Self, String> {
        match value.to_lowercase().trim() {
            "consultation" => Ok(AppointmentType::Consultation),
            "procedure" => Ok(AppointmentType::Procedure),
            "preventive" => Ok(AppointmentType::Preventive),
            "emergency" => Ok(AppointmentType::Emergency),
            "checkup" => Ok(AppointmentType::Checkup),
            "other" => Ok(AppointmentType::Other),
            _ => Err(format!(
                "Invalid appointment type: '{}'. Must be one of: consultation, procedure, \
                 preventive, emergency, checkup, other",
                value
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::Procedure => "procedure",
            AppointmentType::Preventive => "preventive",
            AppointmentType::Emergency => "emergency",
            AppointmentType::Checkup => "checkup",
            AppointmentType::Other => "other",
        }
    }
}

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn from_string(value: &str) -> Result<Self, String> {
        match value.to_lowercase().trim() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            _ => Err(format!("Invalid status: '{}'", value)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// No outgoing transitions exist from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Cancelled and no-show appointments release the provider's time.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, duration_minutes: u32) -> Self {
        TimeRange {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeRange { start, end }
    }

    /// Get the duration in minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Check if this window overlaps with another.
    ///
    /// Windows that merely touch (one ends when the other starts) do not overlap.
    pub fn overlaps_with(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Check if a datetime falls within this window.
    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        &self.start <= dt && dt < &self.end
    }

    /// Widen the window by `minutes` on both sides.
    pub fn padded(&self, minutes: i64) -> TimeRange {
        TimeRange {
            start: self.start - Duration::minutes(minutes),
            end: self.end + Duration::minutes(minutes),
        }
    }

    /// Human-readable label in the given local offset, e.g. `2030-01-07 10:00 - 10:30`.
    pub fn label(&self, offset: FixedOffset) -> String {
        let start = self.start.with_timezone(&offset);
        let end = self.end.with_timezone(&offset);
        if start.date_naive() == end.date_naive() {
            format!("{} - {}", start.format("%Y-%m-%d %H:%M"), end.format("%H:%M"))
        } else {
            format!(
                "{} - {}",
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Represents a booked appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub subject_id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: AppointmentType,
    pub priority: Priority,
    pub reason: String,
    pub internal_notes: Option<String>,
    pub requester_notes: Option<String>,
    pub status: AppointmentStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Reminder thresholds (hours before start) already sent.
    pub reminders_sent: Vec<u32>,
    /// Optimistic-concurrency token, bumped by the store on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Build a freshly scheduled appointment.
    #[allow(clippy::too_many_arguments)]
    pub fn scheduled(
        tenant_id: TenantId,
        subject_id: Uuid,
        requester_id: Uuid,
        provider_id: Option<Uuid>,
        start_time: DateTime<Utc>,
        duration_minutes: u32,
        appointment_type: AppointmentType,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Appointment {
            id: Uuid::new_v4(),
            tenant_id,
            subject_id,
            requester_id,
            provider_id,
            start_time,
            duration_minutes,
            appointment_type,
            priority: Priority::default(),
            reason,
            internal_notes: None,
            requester_notes: None,
            status: AppointmentStatus::Scheduled,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            reminders_sent: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn window(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.duration_minutes)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this appointment currently occupies its provider's time.
    pub fn holds_slot(&self) -> bool {
        self.provider_id.is_some() && !self.is_deleted() && self.status.holds_slot()
    }

    pub fn reminder_sent(&self, threshold_hours: u32) -> bool {
        self.reminders_sent.contains(&threshold_hours)
    }
}

/// One row per status change. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub tenant_id: TenantId,
    pub from_status: AppointmentStatus,
    pub to_status: AppointmentStatus,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Staff-initiated booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub subject_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub priority: Priority,
    pub reason: String,
    pub internal_notes: Option<String>,
    pub requester_notes: Option<String>,
}

/// Booking request made by the subject's owner themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAppointmentRequest {
    pub subject_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub appointment_type: AppointmentType,
    pub reason: String,
    pub requester_notes: Option<String>,
}

/// Partial update for reschedule/reassign. Only `Some` fields are touched.
///
/// Nullable fields take `Some(None)` to clear the stored value. In JSON an
/// absent key leaves the field alone and an explicit `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    #[serde(default, deserialize_with = "present")]
    pub provider_id: Option<Option<Uuid>>,
    pub appointment_type: Option<AppointmentType>,
    pub priority: Option<Priority>,
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub internal_notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub requester_notes: Option<Option<String>>,
}

impl AppointmentUpdate {
    /// Whether the update can change which provider slot the appointment holds.
    pub fn touches_schedule(&self) -> bool {
        self.start_time.is_some()
            || self.duration_minutes.is_some()
            || matches!(self.provider_id, Some(Some(_)))
    }
}

// A key that is present, even as `null`, becomes `Some(_)`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Typed list filter. Every `Some` field narrows the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub provider_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub requester_id: Option<Uuid>,
    pub appointment_type: Option<AppointmentType>,
    pub priority: Option<Priority>,
    /// Start time lower bound (inclusive).
    pub from: Option<DateTime<Utc>>,
    /// Start time upper bound (exclusive).
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unassigned_only: bool,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.status.map_or(true, |s| appointment.status == s)
            && self
                .provider_id
                .map_or(true, |p| appointment.provider_id == Some(p))
            && self.subject_id.map_or(true, |s| appointment.subject_id == s)
            && self
                .requester_id
                .map_or(true, |r| appointment.requester_id == r)
            && self
                .appointment_type
                .map_or(true, |t| appointment.appointment_type == t)
            && self.priority.map_or(true, |p| appointment.priority == p)
            && self.from.map_or(true, |f| appointment.start_time >= f)
            && self.until.map_or(true, |u| appointment.start_time < u)
            && (!self.unassigned_only || appointment.provider_id.is_none())
    }
}

/// Page request, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Pagination {
    pub const MAX_PER_PAGE: usize = 100;

    pub fn new(page: usize, per_page: usize) -> Self {
        Pagination {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::new(1, 20)
    }
}

/// One page of results plus the total count across all pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl<T> Page<T> {
    /// Cut one page out of a fully ordered result set.
    pub fn paginate(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.per_page)
            .collect();
        Page {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            (self.total + self.per_page - 1) / self.per_page
        }
    }
}
