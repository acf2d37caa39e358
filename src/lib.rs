//! Appointment booking engine.
//!
//! Books time-boxed appointments between a requester, a subject and an
//! optional provider, without ever double-booking a provider. Every status
//! change goes through one state machine and leaves an audit record, and a
//! background scheduler sends reminders and cancels bookings that were never
//! confirmed.
//!
//! Persistence, identity lookups, notification transport and time are
//! consumed through traits ([`AppointmentStore`], [`Directory`], [`Notifier`],
//! [`Clock`], [`Ticker`]); in-memory implementations of each are included.

pub mod booking;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod directory;
pub mod error;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod workflow;

pub use booking::{Availability, BookingService, BusySlot};
pub use calendar::{CalendarDay, CalendarEntry, CalendarView};
pub use clock::{Clock, IntervalTicker, ManualClock, ManualTickHandle, ManualTicker, SystemClock, Ticker};
pub use config::SchedulingConfig;
pub use conflict::ConflictDetector;
pub use directory::{Directory, InMemoryDirectory, Subject};
pub use error::{ConfigError, NotifyError, Result, SchedulingError, StorageError};
pub use models::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentType, AppointmentUpdate,
    NewAppointment, Page, Pagination, Priority, StatusTransition, SubjectAppointmentRequest,
    TenantId, TimeRange, SYSTEM_ACTOR,
};
pub use notify::{LoggingNotifier, NotificationKind, Notifier, OutboxNotifier};
pub use scheduler::{ReminderScheduler, SchedulerHandle, SchedulerState, SweepReport};
pub use store::{AppointmentStore, InMemoryAppointmentStore};
pub use workflow::StatusWorkflow;
