//! Capability traits over the underlying log client.
//!
//! A connection set is built from three handles that share one address set:
//! a [`RawClient`], a [`ProducerHandle`] derived from it, and a [`GroupClientHandle`]
//! that hands out one [`GroupConsumer`] per subscription. A [`Transport`] creates them.

pub mod memory;

#[cfg(feature = "rdkafka")]
pub mod kafka;

use crate::config::BrokerOptions;
use crate::protocol::{ConsumedRecord, RecordMetadata};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Factory for the handles of a connection set
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Name the broker registers under
    fn name(&self) -> &'static str;

    /// Create the raw cluster client
    async fn connect_client(
        &self,
        addrs: &[String],
        options: &BrokerOptions,
    ) -> Result<Arc<dyn RawClient>>;

    /// Create a producer bound to the address set of `client`
    async fn new_producer(
        &self,
        client: &dyn RawClient,
        options: &BrokerOptions,
    ) -> Result<Arc<dyn ProducerHandle>>;

    /// Create the consumer-group client
    async fn new_group_client(
        &self,
        addrs: &[String],
        options: &BrokerOptions,
    ) -> Result<Arc<dyn GroupClientHandle>>;
}

/// Raw cluster client
#[async_trait]
pub trait RawClient: Send + Sync {
    fn addrs(&self) -> &[String];

    async fn close(&self) -> Result<()>;
}

/// Acknowledged record producer.
///
/// Implementations must be safe for concurrent `send` calls; publishes are not serialized
/// above this layer.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// Append `payload` to `topic`, resolving once the cluster acknowledged the write
    async fn send(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata>;

    async fn close(&self) -> Result<()>;
}

/// Consumer-group client
#[async_trait]
pub trait GroupClientHandle: Send + Sync {
    /// Join `group` on `topic`. An empty group name yields a private group.
    async fn new_group_consumer(&self, topic: &str, group: &str) -> Result<Arc<dyn GroupConsumer>>;

    async fn close(&self) -> Result<()>;
}

/// One member of a consumer group
#[async_trait]
pub trait GroupConsumer: Send + Sync {
    /// Wait for the next record.
    ///
    /// Returns `None` once the consumer is closed; a blocked call must return promptly when
    /// [`close`](GroupConsumer::close) runs concurrently.
    async fn recv(&self) -> Option<Result<ConsumedRecord>>;

    async fn close(&self) -> Result<()>;
}
