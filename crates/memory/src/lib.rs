//! In-process [`Connector`](topicbridge_core::Connector) for tests and local
//! development.
//!
//! [`MemoryPubSub`] keeps topics, subscriptions and undelivered messages in
//! memory and honours acknowledgement deadlines, so adapter behaviour can be
//! exercised without a network. Faults can be injected to reproduce every
//! service-side failure the adapter reports.

mod broker;
mod subscription;

pub use broker::{MemoryClient, MemoryPubSub};
