//! Error types for the booking engine.

use std::time::Duration as StdDuration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{AppointmentStatus, TimeRange};

/// Main error type for scheduling operations.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Scheduling conflict: {message}")]
    Conflict {
        message: String,
        conflicts: Vec<TimeRange>,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Ownership mismatch: {0}")]
    OwnershipMismatch(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl SchedulingError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn timed_out(budget: StdDuration) -> Self {
        Self::Timeout(u64::try_from(budget.as_millis()).unwrap_or(u64::MAX))
    }

    /// Stable machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::OwnershipMismatch(_) => "OWNERSHIP_MISMATCH",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Storage(_) | Self::Notification(_) | Self::Config(_) => "INFRASTRUCTURE",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// Only infrastructure failures may succeed when retried with the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(StorageError::VersionConflict { .. }) => true,
            Self::Storage(StorageError::Unavailable(_)) => true,
            Self::Storage(_) => false,
            Self::Notification(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Conflicting ranges attached to a conflict rejection.
    pub fn conflicts(&self) -> &[TimeRange] {
        match self {
            Self::Conflict { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}

impl From<StorageError> for SchedulingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SlotTaken { conflicts } => Self::Conflict {
                message: "provider is already booked for part of this time window".to_string(),
                conflicts,
            },
            StorageError::NotFound(id) => Self::not_found("Appointment", id),
            other => Self::Storage(other),
        }
    }
}

/// Persistence-layer errors.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },

    #[error("Provider slot already taken ({} overlapping)", conflicts.len())]
    SlotTaken { conflicts: Vec<TimeRange> },

    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Notification dispatch errors.
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for scheduling operations.
pub type Result<T> = std::result::Result<T, SchedulingError>;
