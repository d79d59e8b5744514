use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for scheduling operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("unknown delay unit: {0}")]
    UnknownUnit(String),

    #[error("delay must be a positive number of milliseconds")]
    InvalidDelay,

    #[error("speedup must be a finite positive number, got {0}")]
    InvalidSpeedup(f64),

    #[error("schedule has no upcoming occurrence")]
    ScheduleExhausted,

    #[error("job has no name, cannot be addressed for an update")]
    UnnamedJob,

    #[error("no running job named '{0}'")]
    JobNotFound(String),

    #[error("job activity has terminated")]
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cron_display_includes_expression() {
        let err = Error::InvalidCronExpression {
            expr: "not-a-cron".to_string(),
            reason: "invalid field".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid cron expression 'not-a-cron': invalid field"
        );
    }

    #[test]
    fn unknown_unit_display() {
        let err = Error::UnknownUnit("mminutes".to_string());
        assert_eq!(err.to_string(), "unknown delay unit: mminutes");
    }

    #[test]
    fn invalid_delay_display() {
        let err = Error::InvalidDelay;
        assert_eq!(err.to_string(), "delay must be a positive number of milliseconds");
    }

    #[test]
    fn invalid_speedup_display_includes_value() {
        let err = Error::InvalidSpeedup(-2.0);
        assert!(err.to_string().contains("-2"));
    }

    #[test]
    fn job_not_found_display() {
        let err = Error::JobNotFound("reaper".to_string());
        assert_eq!(err.to_string(), "no running job named 'reaper'");
    }
}
