use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Args;
use futures::StreamExt;
use topicbridge_core::{CancellationToken, Connector, QueueAdapter, ReceivedMessage};
use tracing::info;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Stop after this many messages.
    #[arg(long)]
    pub max_messages: Option<usize>,
}

/// Print and ack messages until `cancel` fires, the stream ends, or
/// `--max-messages` is reached. Returns the number of messages handled.
pub async fn run<C: Connector>(
    adapter: &QueueAdapter<C>,
    args: &SubscribeArgs,
    format: OutputFormat,
    cancel: CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    if args.max_messages == Some(0) {
        return Ok(0);
    }

    let mut stream = adapter.receive().await?;
    let mut handled = 0usize;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(message) = next else {
            info!("subscription stream closed");
            break;
        };
        let message = message?;

        write_message(out, &message, format)?;
        out.flush()?;
        message.ack();

        handled += 1;
        if args.max_messages.is_some_and(|max| handled >= max) {
            break;
        }
    }

    info!(handled, "stopped receiving");
    Ok(handled)
}

fn write_message(
    out: &mut impl Write,
    message: &ReceivedMessage,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let data = String::from_utf8_lossy(&message.data);
    match format {
        OutputFormat::Text => writeln!(out, "{}\t{data}", message.id)?,
        OutputFormat::Json => {
            let body = serde_json::json!({
                "id": message.id,
                "data": data,
                "data_base64": STANDARD.encode(&message.data),
                "attributes": message.attributes,
                "ordering_key": message.ordering_key,
                "publish_time": message.publish_time.map(|t| t.to_rfc3339()),
                "delivery_attempt": message.delivery_attempt,
            });
            writeln!(out, "{}", serde_json::to_string(&body)?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use topicbridge_core::{AdapterConfig, OutgoingMessage, QueueError};
    use topicbridge_memory::MemoryPubSub;

    use super::*;

    fn adapter(broker: &MemoryPubSub) -> QueueAdapter<MemoryPubSub> {
        QueueAdapter::new(
            AdapterConfig::new("p").with_topic("t").with_subscription("s"),
            broker.clone(),
        )
    }

    #[tokio::test]
    async fn prints_and_acks_up_to_max() {
        let broker = MemoryPubSub::new();
        broker.add_subscription("s", "t");
        let adapter = adapter(&broker);
        adapter.publish("one").await.unwrap();
        adapter.publish("two").await.unwrap();
        adapter.publish("three").await.unwrap();

        let mut out = Vec::new();
        let args = SubscribeArgs {
            max_messages: Some(2),
        };
        let handled = run(
            &adapter,
            &args,
            OutputFormat::Text,
            CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(handled, 2);
        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines, vec!["1\tone", "2\ttwo"]);
        // Only the unread message remains.
        assert_eq!(broker.pending("s"), 1);
    }

    #[tokio::test]
    async fn json_lines_carry_metadata() {
        let broker = MemoryPubSub::new();
        broker.add_subscription("s", "t");
        let adapter = adapter(&broker);
        adapter
            .publish_message(
                OutgoingMessage::new("hi")
                    .with_attribute("k", "v")
                    .with_ordering_key("order-1"),
            )
            .await
            .unwrap();

        let mut out = Vec::new();
        let args = SubscribeArgs {
            max_messages: Some(1),
        };
        run(
            &adapter,
            &args,
            OutputFormat::Json,
            CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["id"], "1");
        assert_eq!(line["data"], "hi");
        assert_eq!(line["data_base64"], "aGk=");
        assert_eq!(line["attributes"]["k"], "v");
        assert_eq!(line["ordering_key"], "order-1");
        assert_eq!(line["delivery_attempt"], 1);
        assert!(line["publish_time"].is_string());
    }

    #[tokio::test]
    async fn cancel_stops_idle_subscriber() {
        let broker = MemoryPubSub::new();
        broker.add_subscription("s", "t");
        let adapter = adapter(&broker);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let handled = run(
            &adapter,
            &SubscribeArgs { max_messages: None },
            OutputFormat::Text,
            cancel,
            &mut Vec::new(),
        )
        .await
        .unwrap();
        assert_eq!(handled, 0);
    }

    #[tokio::test]
    async fn missing_subscription_is_an_error() {
        let broker = MemoryPubSub::new();
        let err = run(
            &adapter(&broker),
            &SubscribeArgs { max_messages: None },
            OutputFormat::Text,
            CancellationToken::new(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::SubscriptionUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn zero_max_messages_skips_receiving() {
        let broker = MemoryPubSub::new();
        let handled = run(
            &adapter(&broker),
            &SubscribeArgs {
                max_messages: Some(0),
            },
            OutputFormat::Text,
            CancellationToken::new(),
            &mut Vec::new(),
        )
        .await
        .unwrap();
        assert_eq!(handled, 0);
        assert_eq!(broker.connections(), 0);
    }
}
