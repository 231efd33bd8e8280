use std::fmt;
use thiserror::Error;

/// How an external service (OCR or extraction model) refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    Overloaded,
    RateLimited,
    Unauthorized,
    Other,
}

impl ServiceErrorKind {
    /// Classifies a failure from its HTTP status (when known) and message text.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lowered = message.to_lowercase();

        if matches!(status, Some(529) | Some(503))
            || (lowered.contains("529") && lowered.contains("overloaded"))
            || lowered.contains("overloaded_error")
        {
            Self::Overloaded
        } else if status == Some(429) || lowered.contains("rate_limit") || lowered.contains("429")
        {
            Self::RateLimited
        } else if status == Some(401)
            || lowered.contains("invalid_api_key")
            || lowered.contains("authentication_error")
            || lowered.contains("401")
        {
            Self::Unauthorized
        } else {
            Self::Other
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Overloaded | Self::RateLimited)
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Overloaded => "service overloaded",
            Self::RateLimited => "rate limit exceeded",
            Self::Unauthorized => "API key invalid or expired",
            Self::Other => "service error",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum LiasseError {
    #[error("Invalid extraction for document '{document}': {details}")]
    InvalidExtraction { document: String, details: String },

    #[error("Could not parse {payload} response for document '{document}'")]
    UnparseableResponse {
        document: String,
        payload: &'static str,
    },

    #[error("{service} {kind}: {message}")]
    Service {
        service: &'static str,
        kind: ServiceErrorKind,
        message: String,
    },

    #[error("PDF processing failed: {0}")]
    Pdf(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("No documents to process")]
    NoDocuments,

    #[error("API key not configured")]
    MissingApiKey,

    #[error("Processing cancelled for profile {0}")]
    Cancelled(String),

    #[error("Profile {0} is already being processed")]
    AlreadyRunning(String),

    #[error("Profile worker is no longer accepting jobs")]
    WorkerClosed,

    #[error("Run for profile {profile_id} aborted: {reason}")]
    RunAborted { profile_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "anthropic")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LiasseError {
    pub fn service(service: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Service {
            service,
            kind: ServiceErrorKind::classify(status, &message),
            message,
        }
    }

    /// Run-level failures abort the whole run; anything else only affects one document.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProfileNotFound(_)
                | Self::NoDocuments
                | Self::MissingApiKey
                | Self::InvalidConfig(_)
                | Self::Cancelled(_)
                | Self::Storage(_)
                | Self::RunAborted { .. }
        )
    }

    pub fn service_kind(&self) -> Option<ServiceErrorKind> {
        match self {
            Self::Service { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LiasseError>;
