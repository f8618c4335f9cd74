use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use google_cloud_auth::credentials::Credentials;
use google_cloud_gax::error::rpc::Code;
use google_cloud_pubsub::client::{Publisher, Subscriber, SubscriptionAdmin, TopicAdmin};
use google_cloud_pubsub::model::Message;
use google_cloud_pubsub::subscriber::handler::Handler;
use google_cloud_pubsub::subscriber::session::Session;
use tracing::{debug, error, info, instrument};

use topicbridge_core::{
    AckHandler, BackendError, BackendStream, ConnectOptions, Connector, OutgoingMessage,
    PubSubClient, ReceivedMessage, SubscriptionSettings,
};

use crate::auth::build_gcp_credentials;
use crate::error::{GcpError, classify_gcp_error, classify_sdk_error};

/// Opens [`GcpClient`]s for Google Cloud `Pub/Sub`.
///
/// Publishers are cached per topic and shared by every client this connector
/// opens, so repeated publishes reuse one batching publisher.
#[derive(Clone, Default)]
pub struct GcpConnector {
    publishers: Arc<DashMap<String, Publisher>>,
}

impl std::fmt::Debug for GcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpConnector")
            .field("cached_publishers", &self.publishers.len())
            .finish()
    }
}

impl GcpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Credentials to hand to the client builders.
///
/// An emulator endpoint without a key file gets anonymous credentials; the
/// emulator rejects nothing and ADC may not be configured locally.
async fn resolve_credentials(options: &ConnectOptions) -> Result<Option<Credentials>, GcpError> {
    let credentials = build_gcp_credentials(options.credentials_file.as_deref()).await?;
    if credentials.is_none() && options.endpoint_url.is_some() {
        debug!("using anonymous credentials for endpoint override");
        return Ok(Some(
            google_cloud_auth::credentials::anonymous::Builder::new().build(),
        ));
    }
    Ok(credentials)
}

macro_rules! build_client {
    ($builder:expr, $endpoint:expr, $credentials:expr) => {{
        let mut builder = $builder;
        if let Some(endpoint) = $endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(creds) = $credentials {
            builder = builder.with_credentials(creds.clone());
        }
        builder.build().await
    }};
}

impl Connector for GcpConnector {
    type Client = GcpClient;

    #[instrument(skip(self, options), fields(provider = "gcp-pubsub"))]
    async fn connect(
        &self,
        project_id: &str,
        options: &ConnectOptions,
    ) -> Result<GcpClient, BackendError> {
        if project_id.is_empty() {
            return Err(GcpError::Service("GCP project ID is not configured".to_owned()).into());
        }

        let credentials = resolve_credentials(options).await?;
        let endpoint = options.endpoint_url.as_deref();

        let topics = build_client!(TopicAdmin::builder(), endpoint, credentials.as_ref())
            .map_err(|e| client_error("topic admin", &e.to_string()))?;
        let subscriptions =
            build_client!(SubscriptionAdmin::builder(), endpoint, credentials.as_ref())
                .map_err(|e| client_error("subscription admin", &e.to_string()))?;

        debug!("opened Pub/Sub admin clients");
        Ok(GcpClient {
            project_id: project_id.to_owned(),
            endpoint_url: options.endpoint_url.clone(),
            credentials,
            topics,
            subscriptions,
            publishers: Arc::clone(&self.publishers),
        })
    }
}

fn client_error(which: &str, err: &str) -> BackendError {
    error!(client = which, error = %err, "failed to build Pub/Sub client");
    classify_gcp_error(err).into()
}

/// One connection to Google Cloud `Pub/Sub`, bound to a project.
pub struct GcpClient {
    project_id: String,
    endpoint_url: Option<String>,
    credentials: Option<Credentials>,
    topics: TopicAdmin,
    subscriptions: SubscriptionAdmin,
    publishers: Arc<DashMap<String, Publisher>>,
}

impl std::fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient")
            .field("project_id", &self.project_id)
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

impl GcpClient {
    /// Build the fully-qualified topic path from a topic name.
    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{topic}", self.project_id)
    }

    /// Build the fully-qualified subscription path from a subscription name.
    fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{subscription}", self.project_id)
    }

    /// Build a [`Publisher`] for the given topic path, or return a cached one.
    async fn get_or_build_publisher(&self, topic_path: &str) -> Result<Publisher, BackendError> {
        if let Some(publisher) = self.publishers.get(topic_path) {
            return Ok(publisher.clone());
        }

        let publisher = build_client!(
            Publisher::builder(topic_path),
            self.endpoint_url.as_deref(),
            self.credentials.as_ref()
        )
        .map_err(|e| client_error("publisher", &e.to_string()))?;

        self.publishers
            .insert(topic_path.to_owned(), publisher.clone());
        Ok(publisher)
    }

    /// Turn a lookup result into existence. Only a `NOT_FOUND` status means
    /// absent; every other failure is returned.
    fn exists<T>(result: google_cloud_pubsub::Result<T>) -> Result<bool, BackendError> {
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.status().is_some_and(|s| s.code == Code::NotFound) => Ok(false),
            Err(e) => {
                error!(error = %e, "Pub/Sub lookup failed");
                Err(classify_sdk_error(&e).into())
            }
        }
    }
}

/// Build a [`Message`] from an outgoing message.
fn build_message(message: OutgoingMessage) -> Message {
    let mut msg = Message::new().set_data(message.data);
    if !message.attributes.is_empty() {
        msg = msg.set_attributes(message.attributes);
    }
    if let Some(key) = message.ordering_key {
        msg = msg.set_ordering_key(key);
    }
    msg
}

fn publish_time(message: &Message) -> Option<DateTime<Utc>> {
    let ts = message.publish_time.as_ref()?;
    DateTime::from_timestamp(ts.seconds(), u32::try_from(ts.nanos()).unwrap_or(0))
}

fn into_received(message: Message, handler: Box<dyn AckHandler>) -> ReceivedMessage {
    let publish_time = publish_time(&message);
    ReceivedMessage::new(message.message_id, message.data, handler)
        .with_attributes(message.attributes.into_iter().collect())
        .with_ordering_key(Some(message.ordering_key))
        .with_publish_time(publish_time)
}

/// Ack handle for a streaming-pull delivery. Dropping the handler without
/// acking nacks the message.
struct GcpAck(Handler);

impl AckHandler for GcpAck {
    fn ack(self: Box<Self>) {
        self.0.ack();
    }

    fn nack(self: Box<Self>) {
        drop(self);
    }
}

type Delivery = google_cloud_pubsub::Result<(Message, Box<dyn AckHandler>)>;

/// A source of streaming-pull deliveries.
trait PullSession: Send + 'static {
    fn next_delivery(&mut self) -> impl Future<Output = Option<Delivery>> + Send;
}

impl PullSession for Session {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        let item = self.next().await?;
        Some(item.map(|(message, handler)| {
            (message, Box::new(GcpAck(handler)) as Box<dyn AckHandler>)
        }))
    }
}

/// Adapt a pull session to a [`BackendStream`]. The first error ends the
/// stream; the session retries transient failures itself.
fn pull_stream<S: PullSession>(mut session: S) -> BackendStream {
    async_stream::stream! {
        while let Some(item) = session.next_delivery().await {
            match item {
                Ok((message, handler)) => yield Ok(into_received(message, handler)),
                Err(e) => {
                    error!(error = %e, "Pub/Sub streaming pull failed");
                    yield Err(BackendError::from(classify_sdk_error(&e)));
                    break;
                }
            }
        }
    }
    .boxed()
}

impl PubSubClient for GcpClient {
    #[instrument(skip(self), fields(provider = "gcp-pubsub"))]
    async fn topic_exists(&self, topic: &str) -> Result<bool, BackendError> {
        let result = self
            .topics
            .get_topic()
            .set_topic(self.topic_path(topic))
            .send()
            .await;
        Self::exists(result)
    }

    #[instrument(skip(self), fields(provider = "gcp-pubsub"))]
    async fn create_topic(&self, topic: &str) -> Result<(), BackendError> {
        let created = self
            .topics
            .create_topic()
            .set_name(self.topic_path(topic))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Pub/Sub topic creation failed");
                BackendError::from(classify_sdk_error(&e))
            })?;
        info!(topic = %created.name, "created Pub/Sub topic");
        Ok(())
    }

    #[instrument(skip(self), fields(provider = "gcp-pubsub"))]
    async fn subscription_exists(&self, subscription: &str) -> Result<bool, BackendError> {
        let result = self
            .subscriptions
            .get_subscription()
            .set_subscription(self.subscription_path(subscription))
            .send()
            .await;
        Self::exists(result)
    }

    #[instrument(skip(self, settings), fields(provider = "gcp-pubsub"))]
    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        settings: &SubscriptionSettings,
    ) -> Result<(), BackendError> {
        let ack_deadline_seconds = i32::try_from(settings.ack_deadline.as_secs())
            .map_err(|_| BackendError::new("ack deadline out of range"))?;

        let created = self
            .subscriptions
            .create_subscription()
            .set_name(self.subscription_path(subscription))
            .set_topic(self.topic_path(topic))
            .set_ack_deadline_seconds(ack_deadline_seconds)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Pub/Sub subscription creation failed");
                BackendError::from(classify_sdk_error(&e))
            })?;
        info!(
            subscription = %created.name,
            ack_deadline_seconds,
            "created Pub/Sub subscription"
        );
        Ok(())
    }

    #[instrument(skip(self, message), fields(provider = "gcp-pubsub"))]
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, BackendError> {
        let topic_path = self.topic_path(topic);
        let publisher = self.get_or_build_publisher(&topic_path).await?;

        publisher
            .publish(build_message(message))
            .await
            .map_err(|e: Arc<google_cloud_pubsub::Error>| {
                error!(error = %e, "Pub/Sub publish failed");
                BackendError::from(classify_sdk_error(&e))
            })
    }

    #[instrument(skip(self), fields(provider = "gcp-pubsub"))]
    async fn receive(&self, subscription: &str) -> Result<BackendStream, BackendError> {
        let subscriber = build_client!(
            Subscriber::builder(),
            self.endpoint_url.as_deref(),
            self.credentials.as_ref()
        )
        .map_err(|e| client_error("subscriber", &e.to_string()))?;

        // Connects lazily; failures to open the pull arrive as stream items.
        let session = subscriber
            .streaming_pull(self.subscription_path(subscription))
            .start();

        debug!("streaming pull started");
        Ok(pull_stream(session))
    }
}
