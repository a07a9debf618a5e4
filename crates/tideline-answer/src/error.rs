use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Underlying cause behind `Arc` so command errors stay cloneable — the same
/// error value fans out to every observer of a failed answer.
#[derive(Debug, Clone)]
pub struct ErrorCause(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl ErrorCause {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ErrorCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Flat label for branching on a [`CommandError`] without destructuring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Auth,
    Timeout,
    Protocol,
    ExternalService,
    Validation,
    Cancelled,
}

impl ErrorCategory {
    pub const ALL: [Self; 7] = [
        Self::Connection,
        Self::Auth,
        Self::Timeout,
        Self::Protocol,
        Self::ExternalService,
        Self::Validation,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::ExternalService => "external_service",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by a failed answer.
///
/// Connection/Auth/Timeout/Protocol/ExternalService originate at the
/// transport and pass through unmodified. Validation is raised before an
/// action is ever queued. Cancelled marks work withdrawn before a result
/// arrived — distinct from a timeout and from a server-reported failure.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("authentication error: {message}")]
    Auth {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("timed out: {message}")]
    Timeout {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("external service error: {message}")]
    ExternalService {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("invalid request: {message}")]
    Validation {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
    #[error("cancelled: {message}")]
    Cancelled {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
    },
}

impl CommandError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            cause: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            cause: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            cause: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            cause: None,
        }
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::ExternalService {
            message: message.into(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            cause: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying error that produced this one.
    #[must_use]
    pub fn with_cause(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        let slot = match &mut self {
            Self::Connection { cause, .. }
            | Self::Auth { cause, .. }
            | Self::Timeout { cause, .. }
            | Self::Protocol { cause, .. }
            | Self::ExternalService { cause, .. }
            | Self::Validation { cause, .. }
            | Self::Cancelled { cause, .. } => cause,
        };
        *slot = Some(ErrorCause::new(err));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::ExternalService { .. } => ErrorCategory::ExternalService,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. }
            | Self::Auth { message, .. }
            | Self::Timeout { message, .. }
            | Self::Protocol { message, .. }
            | Self::ExternalService { message, .. }
            | Self::Validation { message, .. }
            | Self::Cancelled { message, .. } => message,
        }
    }

    /// Only transient transport trouble is worth replaying unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_covers_every_variant() {
        let errors = [
            CommandError::connection("host down"),
            CommandError::auth("ticket expired"),
            CommandError::timeout("no reply"),
            CommandError::protocol("bad tag"),
            CommandError::external_service("vcs proxy 502"),
            CommandError::validation("empty path"),
            CommandError::cancelled("withdrawn"),
        ];
        let got: Vec<_> = errors.iter().map(CommandError::category).collect();
        assert_eq!(got, ErrorCategory::ALL.to_vec());
    }

    #[test]
    fn display_includes_message() {
        let err = CommandError::connection("host unreachable");
        assert_eq!(err.to_string(), "connection error: host unreachable");
        assert_eq!(err.message(), "host unreachable");
    }

    #[test]
    fn cause_is_chained_and_cloneable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CommandError::connection("host unreachable").with_cause(io);
        let cloned = err.clone();
        let source = std::error::Error::source(&cloned).expect("cause present");
        assert!(source.to_string().contains("refused"));
    }

    #[test]
    fn only_connection_and_timeout_are_retryable() {
        assert!(CommandError::connection("x").is_retryable());
        assert!(CommandError::timeout("x").is_retryable());
        assert!(!CommandError::auth("x").is_retryable());
        assert!(!CommandError::protocol("x").is_retryable());
        assert!(!CommandError::external_service("x").is_retryable());
        assert!(!CommandError::validation("x").is_retryable());
        assert!(!CommandError::cancelled("x").is_retryable());
    }

    #[test]
    fn category_display() {
        assert_eq!(ErrorCategory::ExternalService.to_string(), "external_service");
    }
}
