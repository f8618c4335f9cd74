use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A message to publish.
///
/// The payload is opaque to the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub ordering_key: Option<String>,
}

impl OutgoingMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }
}

impl From<Bytes> for OutgoingMessage {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for OutgoingMessage {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for OutgoingMessage {
    fn from(data: &'static [u8]) -> Self {
        Self::new(data)
    }
}

/// Settles a delivered message with the service.
///
/// Implemented by each connector; consumed by [`ReceivedMessage::ack`] and
/// [`ReceivedMessage::nack`].
pub trait AckHandler: Send + Sync {
    fn ack(self: Box<Self>);
    fn nack(self: Box<Self>);
}

/// A message delivered from a subscription.
///
/// Dropping it without calling [`ack`](Self::ack) or [`nack`](Self::nack)
/// leaves it outstanding; the service redelivers it once the subscription's
/// acknowledgement deadline expires.
pub struct ReceivedMessage {
    pub id: String,
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub ordering_key: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    /// 1 on first delivery, incremented on each redelivery when the service
    /// reports it.
    pub delivery_attempt: u32,
    handler: Box<dyn AckHandler>,
}

impl std::fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("id", &self.id)
            .field("data_len", &self.data.len())
            .field("attributes", &self.attributes)
            .field("ordering_key", &self.ordering_key)
            .field("publish_time", &self.publish_time)
            .field("delivery_attempt", &self.delivery_attempt)
            .finish_non_exhaustive()
    }
}

impl ReceivedMessage {
    pub fn new(id: impl Into<String>, data: impl Into<Bytes>, handler: Box<dyn AckHandler>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            attributes: HashMap::new(),
            ordering_key: None,
            publish_time: None,
            delivery_attempt: 1,
            handler,
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_ordering_key(mut self, key: Option<String>) -> Self {
        self.ordering_key = key.filter(|k| !k.is_empty());
        self
    }

    #[must_use]
    pub fn with_publish_time(mut self, publish_time: Option<DateTime<Utc>>) -> Self {
        self.publish_time = publish_time;
        self
    }

    #[must_use]
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt;
        self
    }

    /// Acknowledge the message so it is not delivered again.
    pub fn ack(self) {
        self.handler.ack();
    }

    /// Reject the message so the service redelivers it.
    pub fn nack(self) {
        self.handler.nack();
    }
}
