//! Behaviour of `QueueAdapter` against the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Barrier;

use topicbridge_core::{
    AdapterConfig, CancellationToken, QueueAdapter, QueueError, ResourceKind,
    SUBSCRIPTION_ACK_DEADLINE,
};
use topicbridge_memory::MemoryPubSub;

const PROJECT: &str = "test-project";
const TOPIC: &str = "orders";
const SUBSCRIPTION: &str = "orders-worker";

fn config() -> AdapterConfig {
    AdapterConfig::new(PROJECT)
        .with_topic(TOPIC)
        .with_subscription(SUBSCRIPTION)
}

fn adapter(broker: &MemoryPubSub, config: AdapterConfig) -> QueueAdapter<MemoryPubSub> {
    QueueAdapter::new(config, broker.clone())
}

/// Wait until the broker has started `count` receive streams.
async fn receivers_started(broker: &MemoryPubSub, count: usize) {
    while broker.receivers_started() < count {
        tokio::task::yield_now().await;
    }
}

async fn with_timeout<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("test timed out")
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_to_missing_topic_without_create_is_unavailable() {
    let broker = MemoryPubSub::new();
    let queue = adapter(&broker, config());

    let err = queue.publish(b"hello".to_vec()).await.unwrap_err();
    assert!(matches!(err, QueueError::TopicUnavailable(ref t) if t == TOPIC));
    assert!(!broker.has_topic(TOPIC));
}

#[tokio::test]
async fn publish_to_missing_topic_with_create_creates_it() {
    let broker = MemoryPubSub::new();
    let queue = adapter(&broker, config().with_create_topic(true));

    let id = queue.publish(b"hello".to_vec()).await.unwrap();
    assert!(!id.is_empty());
    assert!(broker.has_topic(TOPIC));

    // A second publish finds the topic and does not try to create it again.
    let second = queue.publish(b"again".to_vec()).await.unwrap();
    assert_ne!(id, second);
}

#[tokio::test]
async fn publish_reaches_existing_subscription() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());

    queue.publish(b"hello".to_vec()).await.unwrap();
    assert_eq!(broker.pending(SUBSCRIPTION), 1);
}

#[tokio::test]
async fn publish_opens_a_client_per_call_without_key_file() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    let queue = adapter(
        &broker,
        config()
            .with_credentials_file("/etc/sa.json")
            .with_endpoint_url("http://localhost:8085"),
    );

    queue.publish(b"1".to_vec()).await.unwrap();
    queue.publish(b"2".to_vec()).await.unwrap();
    assert_eq!(broker.connections(), 2);

    let options = broker.last_connect_options().unwrap();
    assert!(options.credentials_file.is_none());
    assert_eq!(options.endpoint_url.as_deref(), Some("http://localhost:8085"));
}

#[tokio::test]
async fn publish_client_init_failure() {
    let broker = MemoryPubSub::new();
    broker.refuse_connections(Some("UNAVAILABLE: dns error"));
    let queue = adapter(&broker, config().with_create_topic(true));

    let err = queue.publish(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, QueueError::ClientInit(_)));
    assert!(err.to_string().contains("dns error"));
    assert!(!broker.has_topic(TOPIC));
}

#[tokio::test]
async fn publish_with_unset_project_fails_at_connect() {
    let broker = MemoryPubSub::new();
    let queue = adapter(&broker, AdapterConfig::default());

    let err = queue.publish(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, QueueError::ClientInit(_)));
}

#[tokio::test]
async fn publish_topic_creation_rejected() {
    let broker = MemoryPubSub::new();
    broker.reject_creation(ResourceKind::Topic, Some("PERMISSION_DENIED"));
    let queue = adapter(&broker, config().with_create_topic(true));

    let err = queue.publish(b"x".to_vec()).await.unwrap_err();
    match err {
        QueueError::Create { kind, name, source } => {
            assert_eq!(kind, ResourceKind::Topic);
            assert_eq!(name, TOPIC);
            assert_eq!(source.to_string(), "PERMISSION_DENIED");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn publish_send_failure() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    broker.fail_next_publish("INTERNAL: transport closed");
    let queue = adapter(&broker, config());

    let err = queue.publish(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, QueueError::Publish(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn publish_lookup_failure() {
    let broker = MemoryPubSub::new();
    broker.fail_lookups(Some("DEADLINE_EXCEEDED"));
    let queue = adapter(&broker, config().with_create_topic(true));

    let err = queue.publish(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::Lookup {
            kind: ResourceKind::Topic,
            ..
        }
    ));
    assert!(!broker.has_topic(TOPIC));
}

#[tokio::test]
async fn subscribe_lookup_failure() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    broker.fail_lookups(Some("PERMISSION_DENIED: lookups disabled"));
    let queue = adapter(
        &broker,
        config().with_create_topic(true).with_create_subscription(true),
    );

    let err = queue
        .subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Lookup {
            kind: ResourceKind::Subscription,
            ..
        }
    ));
    assert!(!broker.has_subscription(SUBSCRIPTION));
    assert_eq!(broker.receivers_started(), 0);
}

#[test]
fn from_env_uses_process_configuration() {
    let queue = QueueAdapter::from_env(MemoryPubSub::new());
    assert_eq!(queue.config(), &AdapterConfig::from_env());
}

#[tokio::test]
async fn publish_message_keeps_attributes() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());

    queue
        .publish_message(
            topicbridge_core::OutgoingMessage::new(b"{}".to_vec())
                .with_attribute("kind", "order.created"),
        )
        .await
        .unwrap();

    let mut stream = queue.receive().await.unwrap();
    let msg = with_timeout(stream.next()).await.unwrap().unwrap();
    assert_eq!(msg.attributes.get("kind").unwrap(), "order.created");
    msg.ack();
}

// ---------------------------------------------------------------------------
// Subscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_to_missing_subscription_without_create_is_unavailable() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    let queue = adapter(&broker, config());
    let calls = Arc::new(Mutex::new(0_usize));

    let counter = Arc::clone(&calls);
    let err = queue
        .subscribe(CancellationToken::new(), move |_ctx, msg| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                msg.ack();
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::SubscriptionUnavailable(ref s) if s == SUBSCRIPTION));
    assert_eq!(broker.receivers_started(), 0);
    assert_eq!(*calls.lock(), 0);
    assert!(!broker.has_subscription(SUBSCRIPTION));
}

#[tokio::test]
async fn subscribe_creates_topic_and_subscription_then_receives() {
    let broker = MemoryPubSub::new();
    let config = config()
        .with_create_topic(true)
        .with_create_subscription(true);
    let queue = adapter(&broker, config.clone());
    let publisher = adapter(&broker, config);

    let cancel = CancellationToken::new();
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    let consume = queue.subscribe(cancel.clone(), move |ctx, msg| {
        let sink = Arc::clone(&sink);
        async move {
            assert_eq!(ctx.subscription(), SUBSCRIPTION);
            let mut seen = sink.lock();
            seen.push(msg.data.clone());
            if seen.len() == 2 {
                ctx.cancellation().cancel();
            }
            drop(seen);
            msg.ack();
        }
    });

    let produce = async {
        receivers_started(&broker, 1).await;
        publisher.publish(b"first".to_vec()).await.unwrap();
        publisher.publish(b"second".to_vec()).await.unwrap();
    };

    let (result, ()) = with_timeout(async { tokio::join!(consume, produce) }).await;
    result.unwrap();

    assert!(broker.has_topic(TOPIC));
    assert!(broker.has_subscription(SUBSCRIPTION));
    assert_eq!(broker.subscription_topic(SUBSCRIPTION).as_deref(), Some(TOPIC));
    assert_eq!(
        broker.subscription_settings(SUBSCRIPTION).unwrap().ack_deadline,
        SUBSCRIPTION_ACK_DEADLINE
    );
    assert_eq!(SUBSCRIPTION_ACK_DEADLINE, Duration::from_secs(60));

    let mut seen = received.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![&b"first"[..], &b"second"[..]]);
    assert_eq!(broker.pending(SUBSCRIPTION), 0);
}

#[tokio::test]
async fn subscribe_reuses_existing_topic() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    // create_topic stays false: the existing topic must be found, not created.
    let queue = adapter(&broker, config().with_create_subscription(true));

    let cancel = CancellationToken::new();
    cancel.cancel();
    queue.subscribe(cancel, |_ctx, msg| async move { msg.ack() }).await.unwrap();

    assert!(broker.has_subscription(SUBSCRIPTION));
}

#[tokio::test]
async fn subscribe_create_needs_topic_permission_when_topic_missing() {
    let broker = MemoryPubSub::new();
    let queue = adapter(&broker, config().with_create_subscription(true));

    let err = queue
        .subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() })
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::TopicUnavailable(_)));
    assert!(!broker.has_subscription(SUBSCRIPTION));
    assert_eq!(broker.receivers_started(), 0);
}

#[tokio::test]
async fn subscribe_creation_rejected() {
    let broker = MemoryPubSub::new();
    broker.add_topic(TOPIC);
    broker.reject_creation(ResourceKind::Subscription, Some("PERMISSION_DENIED"));
    let queue = adapter(&broker, config().with_create_subscription(true));

    let err = queue
        .subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        QueueError::Create {
            kind: ResourceKind::Subscription,
            ..
        }
    ));
}

#[tokio::test]
async fn subscribe_passes_key_file_to_connector() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config().with_credentials_file("/etc/sa.json"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    queue.subscribe(cancel, |_ctx, msg| async move { msg.ack() }).await.unwrap();

    let options = broker.last_connect_options().unwrap();
    assert_eq!(options.credentials_file.as_deref(), Some("/etc/sa.json"));
}

#[tokio::test]
async fn subscribe_client_init_failure() {
    let broker = MemoryPubSub::new();
    broker.refuse_connections(Some("UNAUTHENTICATED"));
    let queue = adapter(&broker, config().with_create_subscription(true));

    let err = queue
        .subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() })
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::ClientInit(_)));
}

#[tokio::test]
async fn subscribe_returns_terminal_receive_error() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());

    let consume = queue.subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() });
    let break_stream = async {
        receivers_started(&broker, 1).await;
        broker.fail_subscription(SUBSCRIPTION, "UNAVAILABLE: stream reset");
    };

    let (result, ()) = with_timeout(async { tokio::join!(consume, break_stream) }).await;
    let err = result.unwrap_err();
    assert!(matches!(err, QueueError::Receive(_)));
    assert!(err.to_string().contains("stream reset"));
}

#[tokio::test]
async fn subscribe_ends_cleanly_when_stream_closes() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());

    let consume = queue.subscribe(CancellationToken::new(), |_ctx, msg| async move { msg.ack() });
    let close = async {
        receivers_started(&broker, 1).await;
        broker.delete_subscription(SUBSCRIPTION);
    };

    let (result, ()) = with_timeout(async { tokio::join!(consume, close) }).await;
    result.unwrap();
}

#[tokio::test]
async fn subscribe_stops_on_external_cancel() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());
    let cancel = CancellationToken::new();

    let consume = queue.subscribe(cancel.clone(), |_ctx, msg| async move { msg.ack() });
    let stop = async {
        receivers_started(&broker, 1).await;
        cancel.cancel();
    };

    let (result, ()) = with_timeout(async { tokio::join!(consume, stop) }).await;
    result.unwrap();
}

#[tokio::test]
async fn subscribe_runs_handlers_concurrently() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config()).with_max_concurrent_handlers(2);
    queue.publish(b"a".to_vec()).await.unwrap();
    queue.publish(b"b".to_vec()).await.unwrap();

    // Each handler waits for the other; this only completes if both run at once.
    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(Mutex::new(0_usize));
    let cancel = CancellationToken::new();

    let (barrier_h, done_h) = (Arc::clone(&barrier), Arc::clone(&done));
    let consume = queue.subscribe(cancel.clone(), move |ctx, msg| {
        let barrier = Arc::clone(&barrier_h);
        let done = Arc::clone(&done_h);
        async move {
            barrier.wait().await;
            msg.ack();
            let mut finished = done.lock();
            *finished += 1;
            if *finished == 2 {
                ctx.cancellation().cancel();
            }
        }
    });

    with_timeout(consume).await.unwrap();
    assert_eq!(*done.lock(), 2);
    assert_eq!(broker.pending(SUBSCRIPTION), 0);
}

// ---------------------------------------------------------------------------
// Receive stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receive_stream_redelivers_nacked_message() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());
    let id = queue.publish(b"retry me".to_vec()).await.unwrap();

    let mut stream = queue.receive().await.unwrap();
    let first = with_timeout(stream.next()).await.unwrap().unwrap();
    assert_eq!(first.id, id);
    first.nack();

    let again = with_timeout(stream.next()).await.unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.delivery_attempt, 2);
    again.ack();
    assert_eq!(broker.pending(SUBSCRIPTION), 0);
}

#[tokio::test(start_paused = true)]
async fn receive_stream_redelivers_after_ack_deadline() {
    let broker = MemoryPubSub::new();
    let queue = adapter(
        &broker,
        config()
            .with_create_topic(true)
            .with_create_subscription(true),
    );
    let mut stream = queue.receive().await.unwrap();
    queue.publish(b"slow".to_vec()).await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    let delivered_at = tokio::time::Instant::now();
    drop(first);

    let again = stream.next().await.unwrap().unwrap();
    assert_eq!(again.delivery_attempt, 2);
    assert!(delivered_at.elapsed() >= SUBSCRIPTION_ACK_DEADLINE);
}

#[tokio::test]
async fn receive_stream_surfaces_terminal_error() {
    let broker = MemoryPubSub::new();
    broker.add_subscription(SUBSCRIPTION, TOPIC);
    let queue = adapter(&broker, config());

    let mut stream = queue.receive().await.unwrap();
    broker.fail_subscription(SUBSCRIPTION, "INTERNAL");

    let err = with_timeout(stream.next()).await.unwrap().unwrap_err();
    assert!(matches!(err, QueueError::Receive(_)));
    assert!(stream.next().await.is_none());
}
