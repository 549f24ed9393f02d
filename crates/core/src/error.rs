//! Error type shared by every pipeline stage.
//!
//! Errors a caller is expected to branch on carry a stable code:
//! - QUEUE_001-002: backpressure and shutdown at the ingestion queue
//! - VALID_001-003: record and batch validation
//! - DB_001-002: storage failures, DB_002 being retryable
//! - GEO_001: geocoding lookups

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! error_codes {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub const fn code(self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

error_codes! {
    QueueErrorCode {
        /// At capacity
        Full => "QUEUE_001",
        /// No longer accepting batches
        Closed => "QUEUE_002",
    }
}

error_codes! {
    ValidationErrorCode {
        MissingIdentityKey => "VALID_001",
        /// More records than `max_batch_records`
        BatchTooLarge => "VALID_002",
        InvalidField => "VALID_003",
    }
}

error_codes! {
    DbErrorCode {
        /// Statement or connection failure
        StoreFailed => "DB_001",
        /// Lock contention, busy database or pool timeout
        Busy => "DB_002",
    }
}

const GEOCODING_CODE: &str = "GEO_001";

#[derive(Debug, Error)]
pub enum Error {
    #[error("[{code}] {message}")]
    Queue {
        code: QueueErrorCode,
        message: String,
    },

    #[error("[{code}] {message}")]
    Invalid {
        code: ValidationErrorCode,
        message: String,
    },

    #[error("[{code}] {message}")]
    Database { code: DbErrorCode, message: String },

    /// Transport, status or payload failure talking to the geocoder.
    #[error("[GEO_001] {0}")]
    Geocoding(String),

    #[error("unknown status: {0}")]
    InvalidStatus(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("shutting down: {0}")]
    Shutdown(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn queue_full(capacity: usize) -> Self {
        Self::Queue {
            code: QueueErrorCode::Full,
            message: format!("queue is full ({} batches)", capacity),
        }
    }

    pub fn queue_closed() -> Self {
        Self::Queue {
            code: QueueErrorCode::Closed,
            message: "queue is closed".to_string(),
        }
    }

    pub fn validation_code(code: ValidationErrorCode, msg: impl Into<String>) -> Self {
        Self::Invalid {
            code,
            message: msg.into(),
        }
    }

    pub fn database(code: DbErrorCode, msg: impl Into<String>) -> Self {
        Self::Database {
            code,
            message: msg.into(),
        }
    }

    pub fn geocoding(msg: impl Into<String>) -> Self {
        Self::Geocoding(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::Shutdown(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::Queue { code: QueueErrorCode::Full, .. })
    }

    pub fn is_queue_closed(&self) -> bool {
        matches!(self, Self::Queue { code: QueueErrorCode::Closed, .. })
    }

    /// Storage errors expected to clear on their own; the batch is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { code: DbErrorCode::Busy, .. })
    }

    /// Stable code, for coded errors only.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Queue { code, .. } => Some(code.code()),
            Self::Invalid { code, .. } => Some(code.code()),
            Self::Database { code, .. } => Some(code.code()),
            Self::Geocoding(_) => Some(GEOCODING_CODE),
            _ => None,
        }
    }
}
