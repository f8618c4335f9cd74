//! Google Cloud `Pub/Sub` connector for topicbridge.
//!
//! - [`auth`] loads service-account credentials (or falls back to ADC)
//! - [`error`] classifies service failures
//! - [`GcpConnector`] (`pubsub` feature) implements
//!   [`Connector`](topicbridge_core::Connector) on top of `google-cloud-pubsub`

pub mod auth;
pub mod error;

#[cfg(feature = "pubsub")]
pub mod pubsub;

pub use error::GcpError;

#[cfg(feature = "pubsub")]
pub use pubsub::{GcpClient, GcpConnector};
