use serde::Serialize;

/// Shared error type used across every codeagent crate.
///
/// Categories mirror the error taxonomy the rest of the system keys its
/// retry, propagation, and HTTP-status-mapping decisions off of: see
/// `category()` and `retryable()`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cancelled")]
    Cancellation,

    #[error("validation: {0}")]
    Validation(String),

    #[error("parameter parse failure: {0}")]
    ParameterParseFailure(String),

    #[error("tool execution error in {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("api error ({category:?}): {message}")]
    Api {
        category: ApiErrorCategory,
        message: String,
    },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("output too large: {0}")]
    OutputTooLarge(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Sub-categorization of `Error::Api`, per the credentials/model/rate-limit
/// split the propagation policy cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCategory {
    /// 401/403 — critical, aborts the loop.
    Credentials,
    /// 404 unknown model — critical.
    UnknownModel,
    /// Rate-limit or 5xx — retryable up to the configured cap.
    RateLimitOrServer,
}

/// Coarse category label, used for HTTP status mapping and CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cancellation,
    ValidationError,
    ParameterParseFailure,
    ToolExecutionError,
    BackendUnavailable,
    BackendNotFound,
    Timeout,
    ApiError,
    OutputTooLarge,
    QuotaExceeded,
    InternalError,
}

impl Error {
    pub fn category(&self) -> Category {
        match self {
            Error::Cancellation => Category::Cancellation,
            Error::Validation(_) => Category::ValidationError,
            Error::ParameterParseFailure(_) => Category::ParameterParseFailure,
            Error::ToolExecution { .. } => Category::ToolExecutionError,
            Error::BackendUnavailable(_) => Category::BackendUnavailable,
            Error::BackendNotFound(_) => Category::BackendNotFound,
            Error::Timeout(_) => Category::Timeout,
            Error::Api { .. } => Category::ApiError,
            Error::Provider { .. } => Category::ApiError,
            Error::OutputTooLarge(_) => Category::OutputTooLarge,
            Error::QuotaExceeded(_) => Category::QuotaExceeded,
            Error::Http(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_)
            | Error::Auth(_)
            | Error::Internal(_) => Category::InternalError,
        }
    }

    /// Whether a retry policy (LLM router, Backend Manager) may retry this.
    /// Cancellation and validation errors are never retried.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Api { category, .. } => *category == ApiErrorCategory::RateLimitOrServer,
            _ => false,
        }
    }

    /// Critical API errors abort the agent loop and propagate to the caller.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::Api {
                category: ApiErrorCategory::Credentials | ApiErrorCategory::UnknownModel,
                ..
            }
        )
    }

    /// Short recovery hint shown alongside retryable/surfaced errors.
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Error::Api {
                category: ApiErrorCategory::Credentials,
                ..
            } => Some("check your API key"),
            Error::Timeout(_) => Some("increase the timeout"),
            Error::BackendUnavailable(_) | Error::BackendNotFound(_) => {
                Some("install missing dependencies")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
