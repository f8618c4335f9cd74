//! Publish/subscribe adapter for a managed topic.
//!
//! [`QueueAdapter`] reads an [`AdapterConfig`] (usually from the environment),
//! creates the topic and subscription on demand when allowed, publishes
//! payloads and streams deliveries to a handler. All network work goes
//! through a [`Connector`]; see `topicbridge-gcp` for Google Cloud `Pub/Sub`
//! and `topicbridge-memory` for an in-process broker.

pub mod adapter;
pub mod config;
pub mod connector;
pub mod error;
pub mod message;

pub use adapter::{MessageStream, QueueAdapter, ReceiveContext};
pub use config::AdapterConfig;
pub use connector::{
    BackendStream, ConnectOptions, Connector, PubSubClient, SUBSCRIPTION_ACK_DEADLINE,
    SubscriptionSettings,
};
pub use error::{BackendError, QueueError, ResourceKind};
pub use message::{AckHandler, OutgoingMessage, ReceivedMessage};

pub use tokio_util::sync::CancellationToken;
