use std::future::Future;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::AdapterConfig;
use crate::connector::{ConnectOptions, Connector, PubSubClient, SubscriptionSettings};
use crate::error::{QueueError, ResourceKind};
use crate::message::{OutgoingMessage, ReceivedMessage};

/// Default upper bound on handler invocations running at once in
/// [`QueueAdapter::subscribe`].
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 16;

/// Deliveries returned by [`QueueAdapter::receive`].
///
/// An `Err` item is terminal.
pub type MessageStream = BoxStream<'static, Result<ReceivedMessage, QueueError>>;

/// Passed to the handler alongside every message.
#[derive(Debug, Clone)]
pub struct ReceiveContext {
    subscription: String,
    cancel: CancellationToken,
}

impl ReceiveContext {
    /// The subscription the message came from.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Token cancelling the receive loop. Handlers may cancel it to stop
    /// receiving, or watch it to abandon long work.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Publishes to and receives from one topic/subscription pair.
///
/// Every operation opens its own client through the [`Connector`]. Missing
/// resources are created only when the matching flag in [`AdapterConfig`]
/// allows it. Nothing is retried: the first failure is returned.
pub struct QueueAdapter<C> {
    config: AdapterConfig,
    connector: C,
    max_concurrent_handlers: usize,
}

impl<C> std::fmt::Debug for QueueAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("config", &self.config)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> QueueAdapter<C> {
    /// Create an adapter from an explicit configuration.
    pub fn new(config: AdapterConfig, connector: C) -> Self {
        debug!(?config, "created queue adapter");
        Self {
            config,
            connector,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    /// Create an adapter configured from the process environment.
    ///
    /// See [`AdapterConfig::from_env`]. Never fails; missing values surface
    /// as errors from later operations.
    pub fn from_env(connector: C) -> Self {
        Self::new(AdapterConfig::from_env(), connector)
    }

    /// Limit how many handler invocations may run at once. Zero is treated
    /// as one.
    #[must_use]
    pub fn with_max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit.max(1);
        self
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Publish a raw payload to the configured topic and return the
    /// service-assigned message ID.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<String, QueueError> {
        self.publish_message(OutgoingMessage::new(payload)).await
    }

    /// Publish a message with attributes and/or an ordering key.
    #[instrument(skip(self, message), fields(topic = %self.config.topic))]
    pub async fn publish_message(&self, message: OutgoingMessage) -> Result<String, QueueError> {
        // Publishing uses ambient credentials; the key file is for receiving.
        let client = self
            .connect(ConnectOptions {
                credentials_file: None,
                endpoint_url: self.config.endpoint_url.clone(),
            })
            .await?;

        self.resolve_or_create_topic(&client).await?;

        debug!(bytes = message.data.len(), "publishing message");
        let id = client
            .publish(&self.config.topic, message)
            .await
            .map_err(|e| {
                error!(error = %e, "publish failed");
                QueueError::Publish(e)
            })?;

        info!(message_id = %id, "published message");
        Ok(id)
    }

    /// Resolve (or create) the subscription and start receiving.
    ///
    /// The returned stream is cancelled by dropping it.
    #[instrument(skip(self), fields(subscription = %self.config.subscription))]
    pub async fn receive(&self) -> Result<MessageStream, QueueError> {
        info!("subscribing");
        let client = self
            .connect(ConnectOptions {
                credentials_file: self.config.credentials_path().map(ToOwned::to_owned),
                endpoint_url: self.config.endpoint_url.clone(),
            })
            .await?;

        self.resolve_or_create_subscription(&client).await?;

        let stream = client
            .receive(&self.config.subscription)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to start receiving");
                QueueError::Receive(e)
            })?;

        Ok(stream.map_err(QueueError::Receive).boxed())
    }

    /// Receive messages and hand each one to `handler` until `cancel` fires,
    /// the service ends the stream, or the stream fails.
    ///
    /// Up to `max_concurrent_handlers` invocations run concurrently; their
    /// order is not guaranteed. The handler is responsible for acking.
    #[instrument(skip(self, cancel, handler), fields(subscription = %self.config.subscription))]
    pub async fn subscribe<F, Fut>(
        &self,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(ReceiveContext, ReceivedMessage) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send,
    {
        let stream = self.receive().await?;
        let ctx = ReceiveContext {
            subscription: self.config.subscription.clone(),
            cancel: cancel.clone(),
        };

        let result = stream
            .take_until(cancel.cancelled())
            .try_for_each_concurrent(self.max_concurrent_handlers, |message| {
                debug!(message_id = %message.id, "delivering message");
                let delivery = handler(ctx.clone(), message);
                async move {
                    delivery.await;
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) if cancel.is_cancelled() => {
                info!("receive loop cancelled");
                Ok(())
            }
            Ok(()) => {
                info!("receive stream ended");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "receive loop failed");
                Err(e)
            }
        }
    }

    async fn connect(&self, options: ConnectOptions) -> Result<C::Client, QueueError> {
        self.connector
            .connect(&self.config.project_id, &options)
            .await
            .map_err(|e| {
                error!(error = %e, project_id = %self.config.project_id, "client init failed");
                QueueError::ClientInit(e)
            })
    }

    async fn resolve_or_create_topic(&self, client: &C::Client) -> Result<(), QueueError> {
        let topic = &self.config.topic;
        let exists = client
            .topic_exists(topic)
            .await
            .map_err(|source| QueueError::Lookup {
                kind: ResourceKind::Topic,
                name: topic.clone(),
                source,
            })?;
        if exists {
            return Ok(());
        }
        if !self.config.create_topic {
            return Err(QueueError::TopicUnavailable(topic.clone()));
        }

        info!(topic = %topic, "topic does not exist, creating it");
        client
            .create_topic(topic)
            .await
            .map_err(|source| QueueError::Create {
                kind: ResourceKind::Topic,
                name: topic.clone(),
                source,
            })
    }

    async fn resolve_or_create_subscription(&self, client: &C::Client) -> Result<(), QueueError> {
        let subscription = &self.config.subscription;
        let exists = client
            .subscription_exists(subscription)
            .await
            .map_err(|source| QueueError::Lookup {
                kind: ResourceKind::Subscription,
                name: subscription.clone(),
                source,
            })?;
        if exists {
            return Ok(());
        }
        if !self.config.create_subscription {
            return Err(QueueError::SubscriptionUnavailable(subscription.clone()));
        }

        info!(subscription = %subscription, "subscription does not exist, creating it");
        self.resolve_or_create_topic(client).await?;
        client
            .create_subscription(
                subscription,
                &self.config.topic,
                &SubscriptionSettings::default(),
            )
            .await
            .map_err(|source| QueueError::Create {
                kind: ResourceKind::Subscription,
                name: subscription.clone(),
                source,
            })
    }
}
