use std::io::Write;

use clap::Args;
use topicbridge_core::{Connector, OutgoingMessage, QueueAdapter};

use super::parse_key_val;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Message payload (string or @file path).
    pub data: String,
    /// Message attributes (key=value).
    #[arg(long = "attr", value_parser = parse_key_val)]
    pub attributes: Vec<(String, String)>,
    /// Ordering key.
    #[arg(long)]
    pub ordering_key: Option<String>,
}

/// Resolve the payload argument, reading it from a file for `@path`.
fn read_payload(data: &str) -> anyhow::Result<Vec<u8>> {
    match data.strip_prefix('@') {
        Some(path) => Ok(std::fs::read(path)?),
        None => Ok(data.as_bytes().to_vec()),
    }
}

pub async fn run<C: Connector>(
    adapter: &QueueAdapter<C>,
    args: &PublishArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut message = OutgoingMessage::new(read_payload(&args.data)?);
    for (key, value) in &args.attributes {
        message = message.with_attribute(key, value);
    }
    if let Some(ref key) = args.ordering_key {
        message = message.with_ordering_key(key);
    }

    let id = adapter.publish_message(message).await?;

    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "topic": adapter.config().topic,
                "message_id": id,
                "status": "published",
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        OutputFormat::Text => writeln!(out, "{id}")?,
    }
    Ok(())
}
