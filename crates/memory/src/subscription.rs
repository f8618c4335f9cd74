use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use topicbridge_core::{
    AckHandler, BackendError, BackendStream, ReceivedMessage, SubscriptionSettings,
};

/// A message as stored on a subscription.
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub id: String,
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub ordering_key: Option<String>,
    pub publish_time: DateTime<Utc>,
    pub attempt: u32,
}

/// A delivered message awaiting ack.
#[derive(Debug)]
struct Outstanding {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<StoredMessage>,
    outstanding: HashMap<u64, Outstanding>,
    next_token: u64,
    failure: Option<String>,
    deleted: bool,
}

impl Queue {
    /// Move every outstanding message whose deadline has passed back to the
    /// front of the ready queue.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(o) = self.outstanding.remove(&token) {
                debug!(message_id = %o.message.id, "ack deadline expired, redelivering");
                self.ready.push_front(redelivery(o.message));
            }
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.outstanding.values().map(|o| o.deadline).min()
    }
}

fn redelivery(mut message: StoredMessage) -> StoredMessage {
    message.attempt += 1;
    message
}

/// State of one subscription, shared by the broker, its receive streams and
/// the ack handles of delivered messages.
#[derive(Debug)]
pub(crate) struct SubscriptionState {
    pub topic: String,
    pub settings: SubscriptionSettings,
    queue: Mutex<Queue>,
    notify: Notify,
}

enum Next {
    Deliver(u64, StoredMessage),
    Fail(String),
    End,
    Wait(Option<Instant>),
}

impl SubscriptionState {
    pub fn new(topic: impl Into<String>, settings: SubscriptionSettings) -> Self {
        Self {
            topic: topic.into(),
            settings,
            queue: Mutex::new(Queue::default()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, message: StoredMessage) {
        self.queue.lock().ready.push_back(message);
        self.notify.notify_waiters();
    }

    /// Messages not yet acknowledged, delivered or not.
    pub fn pending(&self) -> usize {
        let queue = self.queue.lock();
        queue.ready.len() + queue.outstanding.len()
    }

    /// End every receive stream with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.queue.lock().failure = Some(reason.into());
        self.notify.notify_waiters();
    }

    /// End every receive stream without an error.
    pub fn delete(&self) {
        self.queue.lock().deleted = true;
        self.notify.notify_waiters();
    }

    fn next(&self) -> Next {
        let mut queue = self.queue.lock();
        if let Some(reason) = queue.failure.clone() {
            return Next::Fail(reason);
        }
        if queue.deleted {
            return Next::End;
        }

        let now = Instant::now();
        queue.requeue_expired(now);
        match queue.ready.pop_front() {
            Some(message) => {
                let token = queue.next_token;
                queue.next_token += 1;
                queue.outstanding.insert(
                    token,
                    Outstanding {
                        message: message.clone(),
                        deadline: now + self.settings.ack_deadline,
                    },
                );
                Next::Deliver(token, message)
            }
            None => Next::Wait(queue.earliest_deadline()),
        }
    }

    fn settle(&self, token: u64, redeliver: bool) {
        let mut queue = self.queue.lock();
        let Some(outstanding) = queue.outstanding.remove(&token) else {
            // Already redelivered after its deadline.
            return;
        };
        if redeliver {
            queue.ready.push_front(redelivery(outstanding.message));
            drop(queue);
            self.notify.notify_waiters();
        }
    }

    /// Stream of deliveries. Competing streams on one subscription share its
    /// messages.
    pub fn stream(self: Arc<Self>) -> BackendStream {
        let stream = async_stream::stream! {
            loop {
                // Register interest before inspecting the queue so a push in
                // between is not missed.
                let notified = self.notify.notified();
                match self.next() {
                    Next::Deliver(token, message) => {
                        yield Ok(into_received(&self, token, message));
                    }
                    Next::Fail(reason) => {
                        yield Err(BackendError::new(reason));
                        break;
                    }
                    Next::End => break,
                    Next::Wait(Some(deadline)) => {
                        tokio::select! {
                            () = notified => {}
                            () = tokio::time::sleep_until(deadline) => {}
                        }
                    }
                    Next::Wait(None) => notified.await,
                }
            }
        };
        stream.boxed()
    }
}

fn into_received(
    state: &Arc<SubscriptionState>,
    token: u64,
    message: StoredMessage,
) -> ReceivedMessage {
    let handle = MemoryAck {
        state: Arc::clone(state),
        token,
    };
    ReceivedMessage::new(message.id, message.data, Box::new(handle))
        .with_attributes(message.attributes)
        .with_ordering_key(message.ordering_key)
        .with_publish_time(Some(message.publish_time))
        .with_delivery_attempt(message.attempt)
}

struct MemoryAck {
    state: Arc<SubscriptionState>,
    token: u64,
}

impl AckHandler for MemoryAck {
    fn ack(self: Box<Self>) {
        self.state.settle(self.token, false);
    }

    fn nack(self: Box<Self>) {
        self.state.settle(self.token, true);
    }
}
