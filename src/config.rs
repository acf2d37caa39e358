//! Configuration settings for the booking engine.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{FixedOffset, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

const MAX_AUTO_CANCEL_HOURS: i64 = 24 * 365;
const MAX_ITEM_TIMEOUT_SECS: u64 = 60 * 60;
const MAX_WINDOW_MINUTES: i64 = 24 * 60;
const MAX_THRESHOLD_HOURS: u32 = 24 * 30;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub business_hours: BusinessHoursConfig,
    pub booking: BookingConfig,
    pub reminders: ReminderConfig,
}

impl SchedulingConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SchedulingConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations or use defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [PathBuf::from("easybook.toml"), PathBuf::from("config.toml")];

        for path in &config_paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(SchedulingConfig::default())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let hours = &self.business_hours;
        if hours.end_hour > 24 {
            return Err(invalid("business_hours.end_hour must be <= 24"));
        }
        if hours.start_hour >= hours.end_hour {
            return Err(invalid("business_hours.start_hour must be before end_hour"));
        }
        if hours.offset().is_none() {
            return Err(invalid("business_hours.utc_offset_minutes is out of range"));
        }

        let booking = &self.booking;
        if booking.min_duration_minutes == 0
            || booking.min_duration_minutes > booking.max_duration_minutes
        {
            return Err(invalid("booking duration bounds are inconsistent"));
        }
        if booking.default_duration_minutes < booking.min_duration_minutes
            || booking.default_duration_minutes > booking.max_duration_minutes
        {
            return Err(invalid(
                "booking.default_duration_minutes must lie within the duration bounds",
            ));
        }
        if booking.max_write_attempts == 0 {
            return Err(invalid("booking.max_write_attempts must be > 0"));
        }
        if !(1..=MAX_WINDOW_MINUTES).contains(&booking.availability_window_minutes) {
            return Err(invalid(
                "booking.availability_window_minutes must be between 1 and 1440",
            ));
        }
        if booking.notification_timeout_ms == 0 {
            return Err(invalid("booking.notification_timeout_ms must be > 0"));
        }

        let reminders = &self.reminders;
        if reminders.tick_interval_secs == 0 {
            return Err(invalid("reminders.tick_interval_secs must be > 0"));
        }
        if reminders.thresholds_hours.is_empty() {
            return Err(invalid("reminders.thresholds_hours must not be empty"));
        }
        if reminders
            .thresholds_hours
            .iter()
            .any(|&hours| hours == 0 || hours > MAX_THRESHOLD_HOURS)
        {
            return Err(invalid("reminders.thresholds_hours must be between 1 and 720"));
        }
        if reminders.tolerance_minutes > MAX_WINDOW_MINUTES as u64 {
            return Err(invalid("reminders.tolerance_minutes must be <= 1440"));
        }
        // A window narrower than one tick can fall entirely between two ticks.
        let window_secs = reminders
            .tolerance_minutes
            .checked_mul(2 * 60)
            .ok_or_else(|| invalid("reminders.tolerance_minutes is out of range"))?;
        if window_secs < reminders.tick_interval_secs {
            return Err(invalid(
                "reminders.tolerance_minutes window is narrower than the tick interval",
            ));
        }
        if !(1..=MAX_AUTO_CANCEL_HOURS).contains(&reminders.auto_cancel_after_hours) {
            return Err(invalid(
                "reminders.auto_cancel_after_hours must be between 1 and 8760",
            ));
        }
        if !(1..=MAX_ITEM_TIMEOUT_SECS).contains(&reminders.item_timeout_secs) {
            return Err(invalid("reminders.item_timeout_secs must be between 1 and 3600"));
        }
        // One notification dispatch must fit inside a sweep item budget.
        if booking.notification_timeout_ms >= reminders.item_timeout_secs * 1000 {
            return Err(invalid(
                "booking.notification_timeout_ms must be shorter than reminders.item_timeout_secs",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> crate::error::SchedulingError {
    ConfigError::Invalid(message.to_string()).into()
}

/// Opening hours used to validate proposed start times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHoursConfig {
    /// First bookable hour of the day (inclusive).
    pub start_hour: u32,
    /// Closing hour (exclusive).
    pub end_hour: u32,
    /// Weekdays with no bookings.
    pub closed_weekdays: Vec<Weekday>,
    /// Fixed offset from UTC in which hours and weekdays are evaluated.
    pub utc_offset_minutes: i32,
}

impl BusinessHoursConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    pub fn is_closed_on(&self, weekday: Weekday) -> bool {
        self.closed_weekdays.contains(&weekday)
    }
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
            closed_weekdays: vec![Weekday::Sun],
            utc_offset_minutes: 0,
        }
    }
}

/// Booking rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Duration given to subject-side requests.
    pub default_duration_minutes: u32,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub max_reason_length: usize,
    /// Padding around a proposed slot when listing a provider's nearby bookings.
    pub availability_window_minutes: i64,
    /// Attempts for a load-validate-write cycle that loses a version race.
    pub max_write_attempts: u32,
    /// Upper bound on a single notification dispatch.
    pub notification_timeout_ms: u64,
}

impl BookingConfig {
    pub fn notification_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.notification_timeout_ms)
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            default_duration_minutes: 30,
            min_duration_minutes: 15,
            max_duration_minutes: 480,
            max_reason_length: 500,
            availability_window_minutes: 60,
            max_write_attempts: 3,
            notification_timeout_ms: 2000,
        }
    }
}

/// Background reminder and auto-cancellation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub tick_interval_secs: u64,
    /// Hours before start at which a reminder is sent.
    pub thresholds_hours: Vec<u32>,
    /// Half-width of the window around each threshold.
    pub tolerance_minutes: u64,
    /// Age after which a still-unconfirmed appointment is cancelled.
    pub auto_cancel_after_hours: i64,
    /// Per-appointment processing budget inside a sweep.
    pub item_timeout_secs: u64,
    pub auto_cancel_reason: String,
}

impl ReminderConfig {
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.tick_interval_secs)
    }

    pub fn item_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.item_timeout_secs)
    }

    /// How far ahead the reminder sweep has to look.
    pub fn lookahead_minutes(&self) -> i64 {
        let max_threshold = self.thresholds_hours.iter().copied().max().unwrap_or(0);
        i64::from(max_threshold) * 60 + self.tolerance_minutes as i64
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15 * 60,
            thresholds_hours: vec![24, 2],
            tolerance_minutes: 30,
            auto_cancel_after_hours: 24,
            item_timeout_secs: 10,
            auto_cancel_reason: "Automatically cancelled: not confirmed within 24 hours".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.business_hours.start_hour, 8);
        assert_eq!(config.reminders.thresholds_hours, vec![24, 2]);
        assert_eq!(config.reminders.lookahead_minutes(), 24 * 60 + 30);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [business_hours]
            start_hour = 9
            end_hour = 17
            closed_weekdays = ["Sat", "Sun"]

            [reminders]
            thresholds_hours = [48, 24, 2]
        "#;

        let config = SchedulingConfig::from_toml(toml).unwrap();
        assert_eq!(config.business_hours.start_hour, 9);
        assert!(config.business_hours.is_closed_on(Weekday::Sat));
        assert!(!config.business_hours.is_closed_on(Weekday::Mon));
        assert_eq!(config.booking.default_duration_minutes, 30);
        assert_eq!(config.reminders.lookahead_minutes(), 48 * 60 + 30);
    }

    #[test]
    fn test_rejects_inverted_hours() {
        let toml = r#"
            [business_hours]
            start_hour = 18
            end_hour = 8
        "#;
        let err = SchedulingConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("start_hour"));
    }

    #[test]
    fn test_rejects_tolerance_narrower_than_tick() {
        let mut config = SchedulingConfig::default();
        config.reminders.tolerance_minutes = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_auto_cancel_age() {
        let mut config = SchedulingConfig::default();
        config.reminders.auto_cancel_after_hours = -48;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auto_cancel_after_hours"));

        config.reminders.auto_cancel_after_hours = 0;
        assert!(config.validate().is_err());

        let err = SchedulingConfig::from_toml(
            "[reminders]\nauto_cancel_after_hours = 9223372036854775807",
        )
        .unwrap_err();
        assert!(err.to_string().contains("auto_cancel_after_hours"));
    }

    #[test]
    fn test_rejects_out_of_range_timeouts_and_windows() {
        let mut config = SchedulingConfig::default();
        config.reminders.item_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulingConfig::default();
        config.reminders.item_timeout_secs = 1;
        config.booking.notification_timeout_ms = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("notification_timeout_ms"));
        config.booking.notification_timeout_ms = 500;
        assert!(config.validate().is_ok());

        let mut config = SchedulingConfig::default();
        config.booking.availability_window_minutes = -30;
        assert!(config.validate().is_err());
        config.booking.availability_window_minutes = 10_000;
        assert!(config.validate().is_err());

        let mut config = SchedulingConfig::default();
        config.reminders.thresholds_hours = vec![24, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_tolerance_is_rejected_without_overflow() {
        let mut config = SchedulingConfig::default();
        config.reminders.tolerance_minutes = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tolerance_minutes"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[booking]\ndefault_duration_minutes = 45").unwrap();

        let config = SchedulingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.booking.default_duration_minutes, 45);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SchedulingConfig::from_file("/nonexistent/easybook.toml").unwrap_err();
        assert_eq!(err.code(), "INFRASTRUCTURE");
    }
}
