//! Error types for webhook administration and delivery operations.
//!
//! Configuration errors come back synchronously from administrative calls.
//! Failures of individual HTTP attempts are not errors at all: they are
//! recorded on the delivery and handed to the retry scheduler, so nothing
//! here ever reaches an event producer.

use std::{fmt, time::Duration};

use hookrelay_core::{CoreError, DeliveryId, SubscriptionId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised by the registry, dispatcher, scheduler and engine.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Subscription URL is malformed or uses a disallowed scheme.
    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Event type list is empty or names something outside the catalog.
    #[error("invalid event types: {message}")]
    InvalidEventTypes {
        /// Description of the problem
        message: String,
    },

    /// Any other rejected input.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the problem
        message: String,
    },

    /// Subscription does not exist.
    #[error("subscription {id} not found")]
    SubscriptionNotFound {
        /// The missing subscription
        id: SubscriptionId,
    },

    /// Delivery does not exist.
    #[error("delivery {id} not found")]
    DeliveryNotFound {
        /// The missing delivery
        id: DeliveryId,
    },

    /// Persistence layer failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// A job could not be handed to the scheduler.
    #[error("scheduling error: {message}")]
    Scheduling {
        /// Scheduler error message
        message: String,
    },

    /// Invalid engine or client configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The exceeded timeout
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Join error text
        error: String,
    },
}

impl DeliveryError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into(), reason: reason.into() }
    }

    /// Creates an invalid event types error.
    pub fn invalid_event_types(message: impl Into<String>) -> Self {
        Self::InvalidEventTypes { message: message.into() }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a scheduling error.
    pub fn scheduling(message: impl Into<String>) -> Self {
        Self::Scheduling { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Returns true for errors caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            ErrorCategory::from(self),
            ErrorCategory::Validation | ErrorCategory::NotFound
        )
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(message) => Self::Validation { message },
            other => Self::Storage { message: other.to_string() },
        }
    }
}

/// Category of error, used as the stable error code in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected input.
    Validation,
    /// Missing subscription or delivery.
    NotFound,
    /// Persistence failures.
    Storage,
    /// Scheduler failures.
    Scheduling,
    /// Configuration and lifecycle problems.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::InvalidUrl { .. }
            | DeliveryError::InvalidEventTypes { .. }
            | DeliveryError::Validation { .. } => Self::Validation,
            DeliveryError::SubscriptionNotFound { .. } | DeliveryError::DeliveryNotFound { .. } => {
                Self::NotFound
            },
            DeliveryError::Storage { .. } => Self::Storage,
            DeliveryError::Scheduling { .. } => Self::Scheduling,
            DeliveryError::ConfigurationError { .. }
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::WorkerPanic { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Storage => write!(f, "storage"),
            Self::Scheduling => write!(f, "scheduling"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
