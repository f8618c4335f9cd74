use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;

use crate::error::BackendError;
use crate::message::{OutgoingMessage, ReceivedMessage};

/// Acknowledgement deadline applied to every subscription the adapter
/// creates.
pub const SUBSCRIPTION_ACK_DEADLINE: Duration = Duration::from_secs(60);

/// Stream of deliveries produced by [`PubSubClient::receive`].
///
/// An `Err` item is terminal; the stream yields nothing after it.
pub type BackendStream = BoxStream<'static, Result<ReceivedMessage, BackendError>>;

/// Options for opening a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Service account key file. `None` uses ambient credentials.
    pub credentials_file: Option<String>,
    /// Endpoint override, e.g. an emulator.
    pub endpoint_url: Option<String>,
}

/// Settings used when creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub ack_deadline: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            ack_deadline: SUBSCRIPTION_ACK_DEADLINE,
        }
    }
}

/// Opens clients for a managed publish/subscribe service.
///
/// Uses native `async fn` in traits, so it is not object-safe; the adapter is
/// generic over it instead.
pub trait Connector: Send + Sync {
    type Client: PubSubClient;

    /// Open a client bound to `project_id`.
    fn connect(
        &self,
        project_id: &str,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<Self::Client, BackendError>> + Send;
}

/// The service operations the adapter relies on. Names are short resource
/// IDs; expanding them to fully-qualified paths is the client's job.
pub trait PubSubClient: Send + Sync {
    fn topic_exists(&self, topic: &str)
    -> impl Future<Output = Result<bool, BackendError>> + Send;

    fn create_topic(&self, topic: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn subscription_exists(
        &self,
        subscription: &str,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;

    fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        settings: &SubscriptionSettings,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Publish one message and wait for the service-assigned ID.
    fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;

    /// Start receiving from an existing subscription.
    fn receive(
        &self,
        subscription: &str,
    ) -> impl Future<Output = Result<BackendStream, BackendError>> + Send;
}
