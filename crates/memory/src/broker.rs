use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info};

use topicbridge_core::{
    BackendError, BackendStream, ConnectOptions, Connector, OutgoingMessage, PubSubClient,
    ResourceKind, SubscriptionSettings,
};

use crate::subscription::{StoredMessage, SubscriptionState};

/// Faults armed by tests. Each one produces the error a real service would
/// return at that step.
#[derive(Debug, Default)]
struct Faults {
    refuse_connections: Mutex<Option<String>>,
    reject_topic_creation: Mutex<Option<String>>,
    reject_subscription_creation: Mutex<Option<String>>,
    fail_next_publish: Mutex<Option<String>>,
    fail_lookups: Mutex<Option<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Topic name to the subscriptions attached to it.
    topics: DashMap<String, Vec<String>>,
    subscriptions: DashMap<String, Arc<SubscriptionState>>,
    next_message_id: AtomicU64,
    connections: AtomicUsize,
    receivers: AtomicUsize,
    last_connect: Mutex<Option<ConnectOptions>>,
    faults: Faults,
}

/// In-memory publish/subscribe broker.
///
/// Cloning is cheap; clones share the same topics and subscriptions. Names
/// are not scoped by project.
#[derive(Debug, Clone, Default)]
pub struct MemoryPubSub {
    inner: Arc<Inner>,
}

impl MemoryPubSub {
    /// Create a new, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic directly, bypassing any adapter.
    pub fn add_topic(&self, topic: &str) {
        self.inner.topics.entry(topic.to_owned()).or_default();
    }

    /// Create a subscription (and its topic) directly, bypassing any adapter.
    pub fn add_subscription(&self, subscription: &str, topic: &str) {
        self.add_topic(topic);
        self.inner.insert_subscription(subscription, topic, SubscriptionSettings::default());
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.inner.topics.contains_key(topic)
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.inner.subscriptions.contains_key(subscription)
    }

    /// Settings the subscription was created with.
    pub fn subscription_settings(&self, subscription: &str) -> Option<SubscriptionSettings> {
        self.inner
            .subscriptions
            .get(subscription)
            .map(|s| s.settings.clone())
    }

    /// Topic a subscription is attached to.
    pub fn subscription_topic(&self, subscription: &str) -> Option<String> {
        self.inner
            .subscriptions
            .get(subscription)
            .map(|s| s.topic.clone())
    }

    /// Messages on `subscription` that have not been acknowledged.
    pub fn pending(&self, subscription: &str) -> usize {
        self.inner
            .subscriptions
            .get(subscription)
            .map_or(0, |s| s.pending())
    }

    /// Number of clients opened so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Number of receive streams started so far.
    pub fn receivers_started(&self) -> usize {
        self.inner.receivers.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent successful connect.
    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.inner.last_connect.lock().clone()
    }

    /// Refuse every connection with `reason` until cleared with `None`.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        *self.inner.faults.refuse_connections.lock() = reason.map(ToOwned::to_owned);
    }

    /// Reject creation of the given resource kind until cleared with `None`.
    pub fn reject_creation(&self, kind: ResourceKind, reason: Option<&str>) {
        let slot = match kind {
            ResourceKind::Topic => &self.inner.faults.reject_topic_creation,
            ResourceKind::Subscription => &self.inner.faults.reject_subscription_creation,
        };
        *slot.lock() = reason.map(ToOwned::to_owned);
    }

    /// Fail existence checks until cleared with `None`.
    pub fn fail_lookups(&self, reason: Option<&str>) {
        *self.inner.faults.fail_lookups.lock() = reason.map(ToOwned::to_owned);
    }

    /// Fail the next publish with `reason`.
    pub fn fail_next_publish(&self, reason: &str) {
        *self.inner.faults.fail_next_publish.lock() = Some(reason.to_owned());
    }

    /// End every receive stream on `subscription` with a terminal error.
    pub fn fail_subscription(&self, subscription: &str, reason: &str) {
        if let Some(state) = self.inner.subscriptions.get(subscription) {
            state.fail(reason);
        }
    }

    /// Delete a subscription; its receive streams end cleanly.
    pub fn delete_subscription(&self, subscription: &str) {
        if let Some((name, state)) = self.inner.subscriptions.remove(subscription) {
            if let Some(mut subs) = self.inner.topics.get_mut(&state.topic) {
                subs.retain(|s| s != &name);
            }
            state.delete();
        }
    }
}

impl Inner {
    fn insert_subscription(&self, subscription: &str, topic: &str, settings: SubscriptionSettings) {
        self.subscriptions.insert(
            subscription.to_owned(),
            Arc::new(SubscriptionState::new(topic, settings)),
        );
        self.attach(subscription, topic);
    }

    /// Route messages published to `topic` into `subscription`.
    fn attach(&self, subscription: &str, topic: &str) {
        if let Some(mut subs) = self.topics.get_mut(topic) {
            subs.push(subscription.to_owned());
        }
    }

    fn check_lookup(&self) -> Result<(), BackendError> {
        match self.faults.fail_lookups.lock().as_deref() {
            Some(reason) => Err(BackendError::new(reason)),
            None => Ok(()),
        }
    }
}

impl Connector for MemoryPubSub {
    type Client = MemoryClient;

    async fn connect(
        &self,
        project_id: &str,
        options: &ConnectOptions,
    ) -> Result<MemoryClient, BackendError> {
        if let Some(reason) = self.inner.faults.refuse_connections.lock().as_deref() {
            return Err(BackendError::new(reason));
        }
        if project_id.is_empty() {
            return Err(BackendError::new("INVALID_ARGUMENT: project ID is required"));
        }

        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_connect.lock() = Some(options.clone());
        debug!(project_id, "opened in-memory client");
        Ok(MemoryClient {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Client handed out by [`MemoryPubSub`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    inner: Arc<Inner>,
}

impl PubSubClient for MemoryClient {
    async fn topic_exists(&self, topic: &str) -> Result<bool, BackendError> {
        self.inner.check_lookup()?;
        Ok(self.inner.topics.contains_key(topic))
    }

    async fn create_topic(&self, topic: &str) -> Result<(), BackendError> {
        if let Some(reason) = self.inner.faults.reject_topic_creation.lock().as_deref() {
            return Err(BackendError::new(reason));
        }
        if topic.is_empty() {
            return Err(BackendError::new("INVALID_ARGUMENT: topic name is empty"));
        }
        match self.inner.topics.entry(topic.to_owned()) {
            Entry::Occupied(_) => Err(BackendError::new(format!(
                "ALREADY_EXISTS: topic '{topic}' already exists"
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(Vec::new());
                info!(topic, "created in-memory topic");
                Ok(())
            }
        }
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, BackendError> {
        self.inner.check_lookup()?;
        Ok(self.inner.subscriptions.contains_key(subscription))
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        settings: &SubscriptionSettings,
    ) -> Result<(), BackendError> {
        if let Some(reason) = self
            .inner
            .faults
            .reject_subscription_creation
            .lock()
            .as_deref()
        {
            return Err(BackendError::new(reason));
        }
        if subscription.is_empty() {
            return Err(BackendError::new(
                "INVALID_ARGUMENT: subscription name is empty",
            ));
        }
        if !self.inner.topics.contains_key(topic) {
            return Err(BackendError::new(format!(
                "NOT_FOUND: topic '{topic}' does not exist"
            )));
        }
        match self.inner.subscriptions.entry(subscription.to_owned()) {
            Entry::Occupied(_) => {
                return Err(BackendError::new(format!(
                    "ALREADY_EXISTS: subscription '{subscription}' already exists"
                )));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(SubscriptionState::new(topic, settings.clone())));
            }
        }
        self.inner.attach(subscription, topic);
        info!(
            subscription,
            topic,
            ack_deadline_secs = settings.ack_deadline.as_secs(),
            "created in-memory subscription"
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<String, BackendError> {
        if let Some(reason) = self.inner.faults.fail_next_publish.lock().take() {
            return Err(BackendError::new(reason));
        }

        // Clone the names so no map guard is held while touching subscriptions.
        let attached = self
            .inner
            .topics
            .get(topic)
            .map(|subs| subs.clone())
            .ok_or_else(|| BackendError::new(format!("NOT_FOUND: topic '{topic}' does not exist")))?;

        let id = (self.inner.next_message_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let stored = StoredMessage {
            id: id.clone(),
            data: message.data,
            attributes: message.attributes,
            ordering_key: message.ordering_key,
            publish_time: Utc::now(),
            attempt: 1,
        };

        let states: Vec<Arc<SubscriptionState>> = attached
            .iter()
            .filter_map(|name| self.inner.subscriptions.get(name).map(|s| Arc::clone(&s)))
            .collect();
        for state in states {
            state.push(stored.clone());
        }

        debug!(topic, message_id = %id, "published to in-memory topic");
        Ok(id)
    }

    async fn receive(&self, subscription: &str) -> Result<BackendStream, BackendError> {
        let state = self
            .inner
            .subscriptions
            .get(subscription)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| {
                BackendError::new(format!(
                    "NOT_FOUND: subscription '{subscription}' does not exist"
                ))
            })?;

        self.inner.receivers.fetch_add(1, Ordering::SeqCst);
        Ok(state.stream())
    }
}
