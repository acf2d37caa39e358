/// Calendar view over booked appointments.
///
/// Groups a date range's appointments per local business day, optionally for a
/// single provider. Cancelled and no-show bookings are left off the calendar.

use crate::models::{Appointment, AppointmentStatus, AppointmentType, Priority, TimeRange};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One booking as shown on the calendar, in local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub appointment_id: Uuid,
    pub subject_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub priority: Priority,
    pub reason: String,
}

/// All entries on a single local date, sorted by start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub entries: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarView {
    pub range: TimeRange,
    pub provider_id: Option<Uuid>,
    pub days: Vec<CalendarDay>,
}

impl CalendarView {
    /// Build the view from the appointments starting inside `range`.
    pub fn build(
        range: TimeRange,
        provider_id: Option<Uuid>,
        appointments: Vec<Appointment>,
        offset: FixedOffset,
    ) -> Self {
        let mut entries: Vec<CalendarEntry> = appointments
            .into_iter()
            .filter(|apt| !apt.is_deleted() && apt.status.holds_slot())
            .filter(|apt| range.contains(&apt.start_time))
            .filter(|apt| provider_id.map_or(true, |p| apt.provider_id == Some(p)))
            .map(|apt| CalendarEntry {
                appointment_id: apt.id,
                subject_id: apt.subject_id,
                provider_id: apt.provider_id,
                start: apt.start_time.with_timezone(&offset),
                end: apt.end_time().with_timezone(&offset),
                status: apt.status,
                appointment_type: apt.appointment_type,
                priority: apt.priority,
                reason: apt.reason,
            })
            .collect();
        entries.sort_by_key(|e| e.start);

        let mut days: Vec<CalendarDay> = Vec::new();
        for entry in entries {
            let date = entry.start.date_naive();
            match days.last_mut() {
                Some(day) if day.date == date => day.entries.push(entry),
                _ => days.push(CalendarDay {
                    date,
                    entries: vec![entry],
                }),
            }
        }

        CalendarView {
            range,
            provider_id,
            days,
        }
    }

    /// Total number of entries across all days.
    pub fn len(&self) -> usize {
        self.days.iter().map(|d| d.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Get all entries on a specific date.
    pub fn entries_on(&self, date: NaiveDate) -> &[CalendarEntry] {
        self.days
            .iter()
            .find(|d| d.date == date)
            .map(|d| d.entries.as_slice())
            .unwrap_or(&[])
    }
}

impl std::fmt::Display for CalendarView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Calendar {} ({} appointments)", self.range, self.len())?;
        for day in &self.days {
            writeln!(f, "\n{}:", day.date.format("%A, %Y-%m-%d"))?;
            for entry in &day.entries {
                writeln!(
                    f,
                    "  {} - {} [{:9}] {} ({}) - {}",
                    entry.start.format("%H:%M"),
                    entry.end.format("%H:%M"),
                    entry.priority.name(),
                    entry.appointment_type.as_str(),
                    entry.status,
                    entry.reason
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantId;
    use chrono::{TimeZone, Utc};

    fn booking(day: u32, hour: u32, provider: Option<Uuid>) -> Appointment {
        Appointment::scheduled(
            TenantId::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            provider,
            Utc.with_ymd_and_hms(2030, 1, day, hour, 0, 0).unwrap(),
            30,
            AppointmentType::Consultation,
            "Skin rash".to_string(),
            Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_groups_by_local_day_in_order() {
        let range = TimeRange::between(
            Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 10, 0, 0, 0).unwrap(),
        );
        let appointments = vec![
            booking(8, 14, None),
            booking(7, 9, None),
            booking(8, 9, None),
            booking(12, 9, None),
        ];

        let view = CalendarView::build(range, None, appointments, FixedOffset::east_opt(0).unwrap());
        assert_eq!(view.days.len(), 2);
        assert_eq!(view.len(), 3);
        let jan8 = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();
        let hours: Vec<String> = view
            .entries_on(jan8)
            .iter()
            .map(|e| e.start.format("%H:%M").to_string())
            .collect();
        assert_eq!(hours, vec!["09:00", "14:00"]);
    }

    #[test]
    fn test_offset_moves_late_bookings_to_next_day() {
        let range = TimeRange::between(
            Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 8, 0, 0, 0).unwrap(),
        );
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let view = CalendarView::build(range, None, vec![booking(7, 22, None)], offset);
        assert_eq!(view.days[0].date, NaiveDate::from_ymd_opt(2030, 1, 8).unwrap());
    }

    #[test]
    fn test_filters_provider_and_released_slots() {
        let provider = Uuid::new_v4();
        let range = TimeRange::between(
            Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 8, 0, 0, 0).unwrap(),
        );
        let mut cancelled = booking(7, 11, Some(provider));
        cancelled.status = AppointmentStatus::Cancelled;
        let appointments = vec![
            booking(7, 9, Some(provider)),
            booking(7, 10, Some(Uuid::new_v4())),
            cancelled,
        ];

        let view = CalendarView::build(
            range,
            Some(provider),
            appointments,
            FixedOffset::east_opt(0).unwrap(),
        );
        assert_eq!(view.len(), 1);
        assert!(view.to_string().contains("09:00 - 09:30"));
    }
}
