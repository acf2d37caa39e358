/// Background reminder and auto-cancellation sweeps.
///
/// This module provides the ReminderScheduler, which wakes on every tick of a
/// [`Ticker`] and runs two independent sweeps over the store: owner reminders
/// for confirmed appointments approaching a threshold, and cancellation of
/// appointments left unconfirmed for too long. Both go through the
/// [`BookingService`], so they share the request path's workflow and
/// notifications.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::booking::BookingService;
use crate::clock::Ticker;
use crate::error::SchedulingError;
use crate::models::AppointmentStatus;

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub reminders_sent: usize,
    pub auto_cancelled: usize,
    pub failures: usize,
}

impl SweepReport {
    /// Items acted on successfully.
    pub fn processed(&self) -> usize {
        self.reminders_sent + self.auto_cancelled
    }

    /// Share of attempted items that succeeded, as a percentage.
    /// A sweep with nothing to do counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.processed() + self.failures;
        if attempted == 0 {
            return 100.0;
        }
        (self.processed() as f64 / attempted as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Running,
    Stopped,
}

pub struct ReminderScheduler {
    service: Arc<BookingService>,
}

impl ReminderScheduler {
    pub fn new(service: Arc<BookingService>) -> Self {
        ReminderScheduler { service }
    }

    /// Run both sweeps once at the service clock's current time.
    pub async fn run_once(&self) -> SweepReport {
        let now = self.service.clock().now();
        let mut report = SweepReport::default();

        self.sweep_reminders(now, &mut report).await;
        self.sweep_unconfirmed(now, &mut report).await;

        info!(
            reminders_sent = report.reminders_sent,
            auto_cancelled = report.auto_cancelled,
            failures = report.failures,
            "Scheduler sweep finished"
        );
        report
    }

    async fn sweep_reminders(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let reminders = &self.service.config().reminders;
        let lookahead = Duration::minutes(reminders.lookahead_minutes());
        let tolerance = reminders.tolerance_minutes as i64;

        let upcoming = match self.service.store().find_upcoming(None, now, lookahead).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Reminder sweep query failed");
                report.failures += 1;
                return;
            }
        };

        for appointment in upcoming
            .iter()
            .filter(|a| a.status == AppointmentStatus::Confirmed)
        {
            let remaining = (appointment.start_time - now).num_minutes();
            for &threshold in &reminders.thresholds_hours {
                if appointment.reminder_sent(threshold) {
                    continue;
                }
                if (remaining - i64::from(threshold) * 60).abs() > tolerance {
                    continue;
                }

                match self.service.send_reminder(appointment, threshold).await {
                    Ok(true) => report.reminders_sent += 1,
                    Ok(false) => {
                        debug!(appointment_id = %appointment.id, threshold, "Reminder already sent");
                    }
                    Err(e) => {
                        error!(appointment_id = %appointment.id, threshold, error = %e, "Reminder failed");
                        report.failures += 1;
                    }
                }
            }
        }
    }

    async fn sweep_unconfirmed(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let cutoff = now - Duration::hours(self.service.config().reminders.auto_cancel_after_hours);

        let stale = match self.service.store().find_unconfirmed_before(cutoff).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Auto-cancel sweep query failed");
                report.failures += 1;
                return;
            }
        };

        for appointment in &stale {
            match self.service.auto_cancel(appointment).await {
                Ok(_) => {
                    info!(
                        appointment_id = %appointment.id,
                        tenant = %appointment.tenant_id,
                        "Unconfirmed appointment auto-cancelled"
                    );
                    report.auto_cancelled += 1;
                }
                // Confirmed or cancelled since the query ran.
                Err(SchedulingError::InvalidTransition { from, .. }) => {
                    debug!(appointment_id = %appointment.id, status = %from, "Skipping auto-cancel");
                }
                Err(e) => {
                    error!(appointment_id = %appointment.id, error = %e, "Auto-cancel failed");
                    report.failures += 1;
                }
            }
        }
    }

    /// Spawn the sweep loop. One sweep runs per tick until the handle is
    /// stopped or dropped, or the ticker runs out.
    pub fn start<T>(self: Arc<Self>, mut ticker: T) -> SchedulerHandle
    where
        T: Ticker + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel((0u64, SweepReport::default()));
        let state = Arc::new(RwLock::new(SchedulerState::Running));
        let task_state = state.clone();

        let task = tokio::spawn(async move {
            info!("Reminder scheduler started");
            let mut sweeps = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    more = ticker.tick() => {
                        if !more {
                            break;
                        }
                        let report = self.run_once().await;
                        sweeps += 1;
                        progress_tx.send_replace((sweeps, report));
                    }
                }
            }
            *task_state.write() = SchedulerState::Stopped;
            info!(sweeps, "Reminder scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            progress: progress_rx,
            state,
            task,
        }
    }
}

/// Control handle for a running [`ReminderScheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    progress: watch::Receiver<(u64, SweepReport)>,
    state: Arc<RwLock<SchedulerState>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Number of completed sweeps and the latest report.
    pub fn last_sweep(&self) -> (u64, SweepReport) {
        self.progress.borrow().clone()
    }

    /// Wait until at least `count` sweeps have completed.
    ///
    /// Returns `None` if the loop exits first.
    pub async fn wait_for_sweeps(&mut self, count: u64) -> Option<SweepReport> {
        loop {
            {
                let current = self.progress.borrow_and_update();
                if current.0 >= count {
                    return Some(current.1.clone());
                }
            }
            if self.progress.changed().await.is_err() {
                let current = self.progress.borrow();
                return (current.0 >= count).then(|| current.1.clone());
            }
        }
    }

    /// Ask the loop to stop and wait for it to exit.
    ///
    /// An in-flight sweep finishes first.
    pub async fn stop(self) -> SchedulerState {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Reminder scheduler task failed");
            *self.state.write() = SchedulerState::Stopped;
        }
        *self.state.read()
    }
}
