use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("configuration not found: {configuration_id}")]
    ConfigurationNotFound { configuration_id: i64 },

    #[error("sync log not found: {log_id}")]
    LogNotFound { log_id: i64 },

    #[error("sync log {log_id} is already {status}")]
    LogAlreadyFinished { log_id: i64, status: String },

    #[error("sync log {log_id} left running: {source}")]
    LogNotClosed {
        log_id: i64,
        #[source]
        source: Box<Error>,
    },

    #[error("data source error: {message}")]
    DataSource { message: String },

    #[error("sync timed out after {after:?}")]
    Timeout { after: std::time::Duration },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn configuration_not_found(configuration_id: i64) -> Self {
        Self::ConfigurationNotFound { configuration_id }
    }

    #[must_use]
    pub fn log_not_closed(log_id: i64, source: Error) -> Self {
        Self::LogNotClosed {
            log_id,
            source: Box::new(source),
        }
    }

    /// Id of a log row this error left in `running` state.
    #[must_use]
    pub fn unclosed_log_id(&self) -> Option<i64> {
        match self {
            Self::LogNotClosed { log_id, .. } => Some(*log_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn data_source(message: impl Into<String>) -> Self {
        Self::DataSource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Errors caused by the data source being unreachable, unhealthy or slow.
    /// These are recorded on the run's log; the next scheduled fire is the retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DataSource { .. } | Self::Timeout { .. } | Self::Http(_)
        )
    }

    /// Errors the caller caused: rejected before any state was touched.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCron { .. } | Self::Validation { .. } | Self::UnknownTimezone { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::data_source("scraper down").is_transient());
        assert!(
            Error::Timeout {
                after: std::time::Duration::from_secs(300)
            }
            .is_transient()
        );
        assert!(!Error::validation("bad id").is_transient());
        assert!(!Error::configuration_not_found(3).is_transient());
    }

    #[test]
    fn validation_classification() {
        assert!(Error::invalid_cron("* *", "expected 5 fields").is_validation());
        assert!(Error::validation("page must be >= 1").is_validation());
        assert!(!Error::message("boom").is_validation());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::invalid_cron("61 * * * *", "minute out of range");
        assert_eq!(
            err.to_string(),
            "invalid cron expression '61 * * * *': minute out of range"
        );
        assert_eq!(
            Error::configuration_not_found(42).to_string(),
            "configuration not found: 42"
        );
    }

    #[test]
    fn unclosed_log_keeps_its_id_and_cause() {
        let err = Error::log_not_closed(7, Error::message("database is locked"));
        assert_eq!(err.unclosed_log_id(), Some(7));
        assert_eq!(
            err.to_string(),
            "sync log 7 left running: database is locked"
        );
        assert_eq!(Error::message("boom").unclosed_log_id(), None);
    }
}
