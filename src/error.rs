use crate::resilience::circuit_breaker::CircuitState;
use thiserror::Error;

/// Structured error context for configuration and store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key that caused the error (e.g., "breakers.googleCalendar.failure_threshold")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "memory_store", "token_bucket")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Crate-level error type.
///
/// Breaker and limiter *rejections* are not represented here; they are
/// typed per call through [`BreakerError`] and [`GuardError`] so the wrapped
/// operation's own error type survives untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Counter store unavailable: {message}{}", format_context(.context))]
    CounterStoreUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Configuration error pointing at the offending field.
    pub fn config_field(field_path: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new().with_field_path(field_path),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Store connectivity or protocol failure, tagged with the backend name.
    pub fn store_unavailable(msg: impl Into<String>, backend: &str) -> Self {
        Error::CounterStoreUnavailable {
            message: msg.into(),
            context: ErrorContext::new().with_source(backend),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::CounterStoreUnavailable { .. })
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::CounterStoreUnavailable { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Outcome of [`CircuitBreaker::execute`](crate::resilience::CircuitBreaker::execute)
/// when the call did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is OPEN, or a HALF_OPEN probe is already in flight.
    /// The operation was not invoked.
    #[error("dependency '{name}' unavailable: circuit {state}")]
    CircuitOpen {
        name: String,
        state: CircuitState,
        /// Epoch millis after which a probe will be admitted, when known.
        next_attempt_at: Option<u64>,
    },

    /// The wrapped operation ran and failed; its error is forwarded as-is.
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            BreakerError::OperationFailed(e) => Some(e),
            BreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Outcome of [`Resilience::guard`](crate::resilience::Resilience::guard) when
/// the call did not produce a value.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error("rate limit exceeded for '{key}': resets at {reset_at}")]
    RateLimitExceeded {
        key: String,
        remaining: u64,
        /// Epoch millis when the caller's budget is restored.
        reset_at: u64,
    },

    #[error("dependency '{name}' unavailable: circuit {state}")]
    CircuitOpen {
        name: String,
        state: CircuitState,
        next_attempt_at: Option<u64>,
    },

    #[error("operation failed: {0}")]
    OperationFailed(E),
}

impl<E> GuardError<E> {
    /// Rejections are safe to retry later; an operation failure is the
    /// caller's call to make.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GuardError::OperationFailed(_))
    }

    /// Milliseconds until a retry could be admitted, relative to `now_ms`.
    pub fn retry_after_ms(&self, now_ms: u64) -> Option<u64> {
        match self {
            GuardError::RateLimitExceeded { reset_at, .. } => Some(reset_at.saturating_sub(now_ms)),
            GuardError::CircuitOpen {
                next_attempt_at, ..
            } => next_attempt_at.map(|at| at.saturating_sub(now_ms)),
            GuardError::OperationFailed(_) => None,
        }
    }
}

impl<E> From<BreakerError<E>> for GuardError<E> {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::CircuitOpen {
                name,
                state,
                next_attempt_at,
            } => GuardError::CircuitOpen {
                name,
                state,
                next_attempt_at,
            },
            BreakerError::OperationFailed(e) => GuardError::OperationFailed(e),
        }
    }
}
