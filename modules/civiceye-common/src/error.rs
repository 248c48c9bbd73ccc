use thiserror::Error;

/// Unit-scoped pipeline failures. One sample's failure never corrupts
/// or blocks other in-flight units or the shared incident store.
#[derive(Error, Debug)]
pub enum CivicEyeError {
    /// Input validation: rejected immediately, surfaced to the
    /// submitter as "resubmit valid media".
    #[error("Unsupported media kind: {0}")]
    UnsupportedMediaKind(String),

    /// Zero frames or pixels decoded from the submitted payload.
    #[error("Empty media: {0}")]
    EmptyMedia(String),

    /// Transient classifier failure after retries were exhausted.
    /// Surfaced as "processing delayed"; the unit may be resubmitted.
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// The classifier returned out-of-range values. Not retryable; the
    /// unit is quarantined.
    #[error("Invalid model output: {0}")]
    InvalidModelOutput(String),

    /// Report assembly requested before deduplication ran for the
    /// detection. An ordering bug in the caller, never a user error.
    #[error("Incident not resolved for detection (pipeline ordering violation)")]
    IncidentNotResolved,

    /// The unit's cooperative deadline elapsed between stages.
    #[error("Unit deadline exceeded at stage {0}")]
    DeadlineExceeded(&'static str),

    #[error("Incident store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CivicEyeError {
    /// Whether resubmitting the same unit can succeed. Only transient
    /// conditions qualify; everything else is either bad input or a bug.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CivicEyeError::ClassifierUnavailable(_) | CivicEyeError::DeadlineExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CivicEyeError::ClassifierUnavailable("timeout".into()).is_retryable());
        assert!(CivicEyeError::DeadlineExceeded("classify").is_retryable());
        assert!(!CivicEyeError::InvalidModelOutput("confidence 1.2".into()).is_retryable());
        assert!(!CivicEyeError::UnsupportedMediaKind("audio".into()).is_retryable());
        assert!(!CivicEyeError::IncidentNotResolved.is_retryable());
    }
}
