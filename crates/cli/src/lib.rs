//! Commands behind the `topicbridge` binary.
//!
//! Each command is generic over the [`Connector`](topicbridge_core::Connector)
//! so it can run against the in-memory broker as well as GCP.

use clap::{Parser, Subcommand};
use topicbridge_core::AdapterConfig;

pub mod commands;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// topicbridge: a minimal Pub/Sub publisher and subscriber.
#[derive(Parser, Debug)]
#[command(name = "topicbridge", version, about)]
pub struct Cli {
    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Topic to publish to.
    #[arg(long, env = "GCP_TOPIC_NAME", global = true)]
    pub topic: Option<String>,

    /// Subscription to receive from.
    #[arg(long, env = "GCP_SUBSCRIPTION_NAME", global = true)]
    pub subscription: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish one message to the configured topic.
    Publish(commands::publish::PublishArgs),
    /// Print and ack messages from the configured subscription.
    Subscribe(commands::subscribe::SubscribeArgs),
}

impl Cli {
    /// Apply the topic and subscription flags on top of `config`.
    pub fn apply(&self, mut config: AdapterConfig) -> AdapterConfig {
        if let Some(ref topic) = self.topic {
            config = config.with_topic(topic);
        }
        if let Some(ref subscription) = self.subscription {
            config = config.with_subscription(subscription);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "topicbridge",
            "--topic",
            "orders",
            "subscribe",
            "--subscription",
            "orders-sub",
            "--max-messages",
            "3",
        ])
        .unwrap();

        let config = cli.apply(
            AdapterConfig::new("p")
                .with_topic("from-env")
                .with_subscription("from-env-sub"),
        );
        assert_eq!(config.topic, "orders");
        assert_eq!(config.subscription, "orders-sub");
        assert!(matches!(
            cli.command,
            Command::Subscribe(ref args) if args.max_messages == Some(3)
        ));
    }

    #[test]
    fn publish_parses_attributes() {
        let cli = Cli::try_parse_from([
            "topicbridge",
            "--format",
            "json",
            "publish",
            "hello",
            "--attr",
            "k=v",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        let Command::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.data, "hello");
        assert_eq!(args.attributes, vec![("k".to_owned(), "v".to_owned())]);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
