use thiserror::Error;

/// The kind of service resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Topic,
    Subscription,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic => f.write_str("topic"),
            Self::Subscription => f.write_str("subscription"),
        }
    }
}

/// A failure reported by a connector or client, carried verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by [`QueueAdapter`](crate::QueueAdapter) operations.
///
/// Each variant names the step that failed; the service's own message is
/// passed through unchanged.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The service client could not be created.
    #[error("failed to initialize Pub/Sub client: {0}")]
    ClientInit(BackendError),

    /// The topic does not exist and the adapter may not create it.
    #[error("topic '{0}' does not exist and creation is not allowed")]
    TopicUnavailable(String),

    /// The subscription does not exist and the adapter may not create it.
    #[error("subscription '{0}' does not exist and creation is not allowed")]
    SubscriptionUnavailable(String),

    /// Checking whether a resource exists failed.
    #[error("failed to look up {kind} '{name}': {source}")]
    Lookup {
        kind: ResourceKind,
        name: String,
        source: BackendError,
    },

    /// The service rejected the creation of a resource.
    #[error("failed to create {kind} '{name}': {source}")]
    Create {
        kind: ResourceKind,
        name: String,
        source: BackendError,
    },

    /// Sending a message failed.
    #[error("publish failed: {0}")]
    Publish(BackendError),

    /// The receive loop ended with an error.
    #[error("receive failed: {0}")]
    Receive(BackendError),
}

impl QueueError {
    /// Returns `true` if the failure is transient and the caller may retry
    /// the whole operation.
    ///
    /// The adapter itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ClientInit(_) | Self::Lookup { .. } | Self::Publish(_) | Self::Receive(_)
        )
    }

    /// Returns `true` for the two "does not exist and creation is not
    /// allowed" errors.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::TopicUnavailable(_) | Self::SubscriptionUnavailable(_)
        )
    }
}
