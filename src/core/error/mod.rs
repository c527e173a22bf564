use std::fmt;
use std::time::Duration;

/// Broad classification of a [`PipelineError`], used by callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Network,
    Api,
    UnhealthyService,
    Timeout,
    Stage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Errors raised while loading configuration or driving the transformation service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("network error when calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("API error {status} from {endpoint}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("transformation service is unhealthy: {reason}")]
    UnhealthyService {
        reason: String,
        #[source]
        source: Option<Box<PipelineError>>,
    },

    #[error("call to {endpoint} timed out after {}", humantime::format_duration(.after.to_owned()))]
    Timeout { endpoint: String, after: Duration },

    #[error("stage '{stage}' failed: {} of {total} mappings failed", .failures.len())]
    StageFailed {
        stage: String,
        total: usize,
        failures: Vec<MappingFailure>,
    },
}

impl PipelineError {
    pub fn config<T: Into<String>>(message: T) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn unhealthy<T: Into<String>>(reason: T) -> Self {
        PipelineError::UnhealthyService {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Configuration(_) => ErrorCategory::Configuration,
            PipelineError::Authentication(_) => ErrorCategory::Authentication,
            PipelineError::Network { .. } => ErrorCategory::Network,
            PipelineError::Api { .. } => ErrorCategory::Api,
            PipelineError::UnhealthyService { .. } => ErrorCategory::UnhealthyService,
            PipelineError::Timeout { .. } => ErrorCategory::Timeout,
            PipelineError::StageFailed { .. } => ErrorCategory::Stage,
        }
    }

    /// Stable code printed alongside user-facing failures.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "PR2-CFG-001",
            PipelineError::Authentication(_) => "PR2-AUTH-001",
            PipelineError::Network { .. } => "PR2-NET-001",
            PipelineError::Api { .. } => "PR2-API-001",
            PipelineError::UnhealthyService { .. } => "PR2-HEALTH-001",
            PipelineError::Timeout { .. } => "PR2-TIME-001",
            PipelineError::StageFailed { .. } => "PR2-STAGE-001",
        }
    }

    /// Whether the uniform retry policy may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Configuration(_) | PipelineError::StageFailed { .. }
        )
    }
}

/// One failed mapping invocation, kept with enough context to diagnose it.
#[derive(Debug, Clone)]
pub struct MappingFailure {
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    pub attempts: u32,
    pub error: PipelineError,
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "[{}] ", name)?;
        }
        write!(
            f,
            "{} -> {} after {} attempt(s): {}",
            self.source, self.destination, self.attempts, self.error
        )
    }
}
