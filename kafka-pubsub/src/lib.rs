//! # kafka-pubsub
//!
//! A publish/subscribe broker adapter over a partitioned, replicated commit log.
//!
//! Application code talks to a [`Broker`]; underneath, a broker owns three handles against
//! one address set (a raw cluster client, an acknowledged producer, and a consumer-group
//! client) and runs one background delivery loop per subscription.
//!
//! ## Features
//!
//! - **Single lifecycle**: idempotent connect, all-or-nothing handle creation, ordered teardown
//! - **Acknowledged publish**: `publish` resolves only after the cluster accepted the record
//! - **Consumer groups**: subscriptions sharing a group name split a topic's partitions
//! - **Backpressure**: each subscription hands records to its handler one at a time
//! - **Pluggable transports**: librdkafka (feature `rdkafka`) or an in-process log
//!
//! ## Delivery semantics
//!
//! [`Publication::ack`] is a no-op. Offsets are committed by the group consumer's own
//! auto-commit, so from this crate's point of view delivery is at-most-once: nothing here
//! detects or prevents redelivery after a crash.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kafka_pubsub::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = register_brokers(BrokerRegistry::builder()).build();
//!     let broker = registry.create("memory", vec!["127.0.0.1:9092".to_string()], vec![])?;
//!     broker.connect().await?;
//!
//!     let subscriber = broker
//!         .subscribe(
//!             "orders",
//!             handler(|publication| {
//!                 println!("{}: {:?}", publication.topic(), publication.message().body);
//!                 Ok(())
//!             }),
//!             vec![SubscribeOption::queue("billing")],
//!         )
//!         .await?;
//!
//!     broker
//!         .publish("orders", &Message::new("payload").with_header("k", "v"))
//!         .await?;
//!
//!     subscriber.unsubscribe().await?;
//!     broker.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod tls;
pub mod transport;

pub use broker::{Broker, KafkaBroker};
pub use config::*;
pub use consumer::{handler, Handler, Subscriber, SubscriptionState};
pub use error::*;
pub use protocol::{ConsumedRecord, Message, Publication, RecordMetadata};
pub use registry::{register_brokers, BrokerFactory, BrokerRegistry, BrokerRegistryBuilder};
pub use tls::TlsConfig;
pub use transport::memory::{MemoryCluster, MemoryTransport};

/// Library result type
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
