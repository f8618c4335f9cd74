use thiserror::Error;
use topicbridge_core::BackendError;

/// Errors specific to GCP `Pub/Sub` operations.
#[derive(Debug, Error)]
pub enum GcpError {
    /// The GCP service returned an error.
    #[error("GCP service error: {0}")]
    Service(String),

    /// The resource does not exist.
    #[error("GCP resource not found: {0}")]
    NotFound(String),

    /// The resource already exists.
    #[error("GCP resource already exists: {0}")]
    AlreadyExists(String),

    /// The caller lacks permission for the operation.
    #[error("GCP permission denied: {0}")]
    PermissionDenied(String),

    /// The request was throttled by the GCP service.
    #[error("GCP request throttled")]
    Throttled,

    /// A network or connection error occurred communicating with GCP.
    #[error("GCP connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("GCP request timed out")]
    Timeout,

    /// GCP credential resolution failed.
    #[error("credential error: {0}")]
    Credentials(String),
}

impl GcpError {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Connection(_) | Self::Timeout)
    }
}

impl From<GcpError> for BackendError {
    fn from(err: GcpError) -> Self {
        BackendError::new(err.to_string())
    }
}

/// Classify a GCP error string into the appropriate [`GcpError`].
///
/// Inspects the error message for common status codes and patterns and maps
/// them to the correct variant.
pub fn classify_gcp_error(error_str: &str) -> GcpError {
    let lower = error_str.to_lowercase();
    if lower.contains("not_found") || lower.contains("notfound") || lower.contains("404") {
        GcpError::NotFound(error_str.to_owned())
    } else if lower.contains("already_exists")
        || lower.contains("alreadyexists")
        || lower.contains("409")
    {
        GcpError::AlreadyExists(error_str.to_owned())
    } else if lower.contains("permission_denied")
        || lower.contains("permissiondenied")
        || lower.contains("403")
    {
        GcpError::PermissionDenied(error_str.to_owned())
    } else if lower.contains("429")
        || lower.contains("throttl")
        || lower.contains("rate exceed")
        || lower.contains("too many")
        || lower.contains("resource_exhausted")
    {
        GcpError::Throttled
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("deadline_exceeded")
    {
        GcpError::Timeout
    } else if lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("network")
        || lower.contains("unavailable")
    {
        GcpError::Connection(error_str.to_owned())
    } else {
        GcpError::Service(error_str.to_owned())
    }
}

/// Classify an SDK error, preferring the typed RPC status over the message
/// text. Errors without a status fall back to [`classify_gcp_error`].
#[cfg(feature = "pubsub")]
pub fn classify_sdk_error(err: &google_cloud_pubsub::Error) -> GcpError {
    use google_cloud_gax::error::rpc::Code;

    let message = err.to_string();
    if let Some(status) = err.status() {
        return match status.code {
            Code::NotFound => GcpError::NotFound(message),
            Code::AlreadyExists => GcpError::AlreadyExists(message),
            Code::PermissionDenied | Code::Unauthenticated => GcpError::PermissionDenied(message),
            Code::ResourceExhausted => GcpError::Throttled,
            Code::DeadlineExceeded => GcpError::Timeout,
            Code::Unavailable => GcpError::Connection(message),
            _ => GcpError::Service(message),
        };
    }
    if err.is_timeout() {
        GcpError::Timeout
    } else if err.is_connect() || err.is_io() || err.is_transport() {
        GcpError::Connection(message)
    } else {
        classify_gcp_error(&message)
    }
}
