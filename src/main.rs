/// Command-line demo for the booking engine.
///
/// `demo` walks through booking, conflict detection and the status workflow
/// against in-memory adapters. `sweep` seeds a few appointments, moves the
/// clock forward and runs the reminder scheduler.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use easybook::{
    AppointmentStatus, AppointmentType, AppointmentUpdate, BookingService, Clock,
    InMemoryAppointmentStore, InMemoryDirectory, IntervalTicker, LoggingNotifier, ManualClock,
    ManualTicker, NewAppointment, Notifier, OutboxNotifier, Priority, ReminderScheduler,
    SchedulingConfig, Subject, SubjectAppointmentRequest, TenantId, TimeRange,
};

#[derive(Parser, Debug)]
#[command(name = "easybook")]
#[command(version, about = "Appointment booking engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Book, conflict and transition a few appointments
    Demo,
    /// Run scheduler sweeps over seeded appointments
    Sweep {
        /// Number of scheduler ticks to run
        #[arg(short, long, default_value = "1")]
        ticks: u32,

        /// Tick on a real timer with this period instead of on demand
        #[arg(long)]
        period_ms: Option<u64>,
    },
}

struct DemoWorld {
    service: Arc<BookingService>,
    clock: ManualClock,
    scope: TenantId,
    staff: Uuid,
    provider: Uuid,
    subjects: Vec<Subject>,
    opening: DateTime<Utc>,
}

impl DemoWorld {
    fn build(config: SchedulingConfig, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let opening = next_opening(&config)?;
        let clock = ManualClock::new(opening - Duration::hours(1));
        let scope = TenantId::new();
        let provider = Uuid::new_v4();

        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_provider(scope, provider);
        let subjects: Vec<Subject> = ["Max", "Luna", "Charlie"]
            .iter()
            .map(|name| Subject {
                id: Uuid::new_v4(),
                tenant_id: scope,
                owner_id: Uuid::new_v4(),
                name: name.to_string(),
            })
            .collect();
        for subject in &subjects {
            directory.add_subject(subject.clone());
        }

        let service = BookingService::new(
            Arc::new(InMemoryAppointmentStore::new()),
            directory,
            notifier,
            Arc::new(clock.clone()),
            config,
        )?;

        Ok(DemoWorld {
            service: Arc::new(service),
            clock,
            scope,
            staff: Uuid::new_v4(),
            provider,
            subjects,
            opening,
        })
    }

    fn booking(&self, subject: usize, start: DateTime<Utc>, reason: &str) -> NewAppointment {
        NewAppointment {
            subject_id: self.subjects[subject].id,
            provider_id: Some(self.provider),
            start_time: start,
            duration_minutes: 30,
            appointment_type: AppointmentType::Consultation,
            priority: Priority::Normal,
            reason: reason.to_string(),
            internal_notes: None,
            requester_notes: None,
        }
    }
}

/// First open day after today, at opening time.
fn next_opening(config: &SchedulingConfig) -> anyhow::Result<DateTime<Utc>> {
    let hours = &config.business_hours;
    let offset = hours
        .offset()
        .ok_or_else(|| anyhow!("business_hours.utc_offset_minutes is out of range"))?;
    let today = Utc::now().with_timezone(&offset).date_naive();
    let date = (1..=7)
        .map(|days| today + Duration::days(days))
        .find(|d| !hours.is_closed_on(d.weekday()))
        .ok_or_else(|| anyhow!("every weekday is closed"))?;
    let local = date
        .and_hms_opt(hours.start_hour, 0, 0)
        .ok_or_else(|| anyhow!("invalid business_hours.start_hour"))?;
    let opening = offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| anyhow!("ambiguous opening time"))?;
    Ok(opening.with_timezone(&Utc))
}

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("       {}", title);
    println!("{}", "=".repeat(60));
}

async fn run_demo(config: SchedulingConfig) -> anyhow::Result<()> {
    print_header("APPOINTMENT BOOKING DEMO");

    let outbox = Arc::new(OutboxNotifier::new());
    let world = DemoWorld::build(config, outbox.clone())?;
    let service = &world.service;
    let scope = world.scope;
    let ten = world.opening + Duration::hours(2);

    println!("\n--- Booking ---");
    let first = service
        .create(scope, world.staff, world.booking(0, ten, "Annual checkup"))
        .await?;
    println!("  Booked {}: {}", world.subjects[0].name, first.window());

    match service
        .create(
            scope,
            world.staff,
            world.booking(1, ten + Duration::minutes(15), "Vaccination"),
        )
        .await
    {
        Ok(apt) => println!("  Unexpectedly booked {}", apt.window()),
        Err(e) => {
            println!("  Rejected {} at +15 min: [{}] {}", world.subjects[1].name, e.code(), e);
            for range in e.conflicts() {
                println!("    overlaps {}", range);
            }
        }
    }

    let second = service
        .create(
            scope,
            world.staff,
            world.booking(1, ten + Duration::minutes(30), "Vaccination"),
        )
        .await?;
    println!("  Booked {}: {}", world.subjects[1].name, second.window());

    let charlie = &world.subjects[2];
    let requested = service
        .request_from_subject(
            scope,
            charlie.owner_id,
            SubjectAppointmentRequest {
                subject_id: charlie.id,
                start_time: ten + Duration::hours(4),
                appointment_type: AppointmentType::Checkup,
                reason: "Limping on front leg".to_string(),
                requester_notes: Some("Afternoons work best".to_string()),
            },
        )
        .await?;
    println!("  {} requested {} (unassigned)", charlie.name, requested.window());

    println!("\n--- Availability ---");
    let availability = service
        .check_availability(scope, world.provider, ten + Duration::minutes(15), 30, None)
        .await?;
    println!("  Available at +15 min: {}", availability.available);
    for slot in &availability.busy {
        println!("    busy {} ({})", slot.label, slot.status);
    }

    println!("\n--- Workflow ---");
    for target in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
    ] {
        world.clock.advance(Duration::minutes(5));
        let updated = service
            .change_status(scope, first.id, target, world.staff, None)
            .await?;
        println!("  {} -> {}", world.subjects[0].name, updated.status);
    }
    if let Err(e) = service
        .change_status(scope, first.id, AppointmentStatus::Cancelled, world.staff, None)
        .await
    {
        println!("  Cancel after completion rejected: [{}] {}", e.code(), e);
    }

    let cancelled = service
        .cancel_from_subject(
            scope,
            second.id,
            world.subjects[1].owner_id,
            Some("Travelling that week"),
        )
        .await?;
    println!("  {} cancelled by owner: {}", world.subjects[1].name, cancelled.status);

    let assigned = service
        .reschedule(
            scope,
            requested.id,
            AppointmentUpdate {
                provider_id: Some(Some(world.provider)),
                start_time: Some(ten + Duration::minutes(30)),
                ..Default::default()
            },
        )
        .await?;
    println!(
        "  {} assigned and moved into the freed slot: {}",
        charlie.name,
        assigned.window()
    );

    println!("\n--- Calendar ---");
    let day = TimeRange::between(world.opening, world.opening + Duration::hours(12));
    let calendar = service.calendar_view(scope, day, Some(world.provider)).await?;
    print!("{}", calendar);

    println!("\n--- History for {} ---", world.subjects[0].name);
    for record in service.status_history(scope, first.id).await? {
        println!(
            "  {} {} -> {}",
            record.created_at.format("%H:%M"),
            record.from_status,
            record.to_status
        );
    }

    println!("\n--- Notifications ---");
    for sent in outbox.sent() {
        println!("  {}", sent.kind());
    }
    println!("  Total: {}", outbox.sent().len());
    Ok(())
}

async fn run_sweep(
    config: SchedulingConfig,
    ticks: u32,
    period_ms: Option<u64>,
) -> anyhow::Result<()> {
    print_header("REMINDER SWEEP");

    let tick = Duration::seconds(config.reminders.tick_interval_secs as i64);
    let world = DemoWorld::build(config, Arc::new(LoggingNotifier))?;
    let service = &world.service;
    let scope = world.scope;

    // Left unconfirmed; due for auto-cancel once a day has passed.
    let stale = service
        .create(
            scope,
            world.staff,
            world.booking(0, world.opening + Duration::hours(2), "Dental cleaning"),
        )
        .await?;
    world.clock.advance(Duration::hours(25));

    // Confirmed, starting 24 hours from now.
    let upcoming = service
        .create(
            scope,
            world.staff,
            world.booking(1, world.clock.now() + Duration::hours(24), "Follow-up"),
        )
        .await;
    match upcoming {
        Ok(apt) => {
            service
                .change_status(scope, apt.id, AppointmentStatus::Confirmed, world.staff, None)
                .await?;
        }
        Err(e) => println!("  Skipped reminder seed: {}", e),
    }

    let scheduler = Arc::new(ReminderScheduler::new(world.service.clone()));
    let (mut handle, manual) = match period_ms {
        Some(ms) => (
            scheduler.start(IntervalTicker::new(StdDuration::from_millis(ms))),
            None,
        ),
        None => {
            let (ticker, tick_handle) = ManualTicker::new();
            (scheduler.start(ticker), Some(tick_handle))
        }
    };

    for n in 1..=u64::from(ticks) {
        if let Some(tick_handle) = &manual {
            tick_handle.fire();
        }
        let report = handle
            .wait_for_sweeps(n)
            .await
            .context("scheduler exited before the sweep finished")?;
        println!(
            "  Tick {}: {} reminders, {} auto-cancelled, {} failures ({:.1}% success)",
            n,
            report.reminders_sent,
            report.auto_cancelled,
            report.failures,
            report.success_rate()
        );
        world.clock.advance(tick);
    }

    let state = handle.stop().await;
    let stale = service.get(scope, stale.id).await?;
    println!("\n  Stale appointment is now {}", stale.status);
    if let Some(reason) = &stale.cancel_reason {
        println!("  Reason: {}", reason);
    }
    println!("  Scheduler {:?}", state);
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = match &args.config {
        Some(path) => SchedulingConfig::from_file(path)?,
        None => SchedulingConfig::load()?,
    };

    match args.command.unwrap_or(Command::Demo) {
        Command::Demo => run_demo(config).await,
        Command::Sweep { ticks, period_ms } => run_sweep(config, ticks, period_ms).await,
    }
}
