use serde::{Deserialize, Serialize};

/// Environment variable holding the service-account key file path.
pub const ENV_CREDENTIALS_FILE: &str = "GCP_CREDENTIALS_FILE";
/// Environment variable holding the topic name.
pub const ENV_TOPIC_NAME: &str = "GCP_TOPIC_NAME";
/// Environment variable allowing the adapter to create a missing topic.
pub const ENV_CREATE_TOPIC: &str = "GCP_CREATE_TOPIC";
/// Environment variable holding the subscription name.
pub const ENV_SUBSCRIPTION_NAME: &str = "GCP_SUBSCRIPTION_NAME";
/// Environment variable allowing the adapter to create a missing subscription.
pub const ENV_CREATE_SUBSCRIPTION: &str = "GCP_CREATE_SUBSCRIPTION";
/// Environment variable holding the project ID.
pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
/// Host of a local `Pub/Sub` emulator, e.g. `localhost:8085`.
pub const ENV_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";

/// The only value that turns a creation flag on. Anything else, including
/// `true` and `1`, leaves it off.
const FLAG_ENABLED: &str = "TRUE";

/// Configuration for a [`QueueAdapter`](crate::QueueAdapter).
///
/// Every field defaults to empty/`false`. Nothing is validated at
/// construction; a missing value surfaces as an error from the operation that
/// needs it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// GCP project ID.
    #[serde(default)]
    pub project_id: String,

    /// Path to a service account JSON key file. Only used when subscribing;
    /// publishing relies on Application Default Credentials.
    #[serde(default)]
    pub credentials_file: String,

    /// Topic to publish to, and to attach new subscriptions to.
    #[serde(default)]
    pub topic: String,

    /// Create the topic when it does not exist.
    #[serde(default)]
    pub create_topic: bool,

    /// Subscription to receive from.
    #[serde(default)]
    pub subscription: String,

    /// Create the subscription when it does not exist.
    #[serde(default)]
    pub create_subscription: bool,

    /// Optional endpoint URL override for local development
    /// (e.g. the `Pub/Sub` emulator).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("project_id", &self.project_id)
            .field(
                "credentials_file",
                &if self.credentials_file.is_empty() {
                    ""
                } else {
                    "[REDACTED]"
                },
            )
            .field("topic", &self.topic)
            .field("create_topic", &self.create_topic)
            .field("subscription", &self.subscription)
            .field("create_subscription", &self.create_subscription)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl AdapterConfig {
    /// Create a new `AdapterConfig` with the given project ID.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Create configuration from the process environment.
    ///
    /// Reads:
    /// - `GCP_PROJECT_ID`
    /// - `GCP_CREDENTIALS_FILE`
    /// - `GCP_TOPIC_NAME`
    /// - `GCP_CREATE_TOPIC` (`TRUE` enables)
    /// - `GCP_SUBSCRIPTION_NAME`
    /// - `GCP_CREATE_SUBSCRIPTION` (`TRUE` enables)
    /// - `PUBSUB_EMULATOR_HOST` (optional)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset keys become empty strings or `false`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).unwrap_or_default();
        let flag = |key: &str| lookup(key).is_some_and(|v| v == FLAG_ENABLED);

        Self {
            project_id: text(ENV_PROJECT_ID),
            credentials_file: text(ENV_CREDENTIALS_FILE),
            topic: text(ENV_TOPIC_NAME),
            create_topic: flag(ENV_CREATE_TOPIC),
            subscription: text(ENV_SUBSCRIPTION_NAME),
            create_subscription: flag(ENV_CREATE_SUBSCRIPTION),
            endpoint_url: lookup(ENV_EMULATOR_HOST)
                .filter(|host| !host.is_empty())
                .map(|host| format!("http://{host}")),
        }
    }

    /// Set the path to a service account JSON key file.
    #[must_use]
    pub fn with_credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = path.into();
        self
    }

    /// Set the topic name.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Allow or forbid creating the topic.
    #[must_use]
    pub fn with_create_topic(mut self, create: bool) -> Self {
        self.create_topic = create;
        self
    }

    /// Set the subscription name.
    #[must_use]
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = subscription.into();
        self
    }

    /// Allow or forbid creating the subscription.
    #[must_use]
    pub fn with_create_subscription(mut self, create: bool) -> Self {
        self.create_subscription = create;
        self
    }

    /// Set the endpoint URL override.
    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// The credentials file, or `None` when unset.
    pub fn credentials_path(&self) -> Option<&str> {
        Some(self.credentials_file.as_str()).filter(|p| !p.is_empty())
    }
}
