//! Broker facade: the only surface application code touches

use crate::config::{
    BrokerConfig, BrokerOption, BrokerOptions, SubscribeOption, SubscribeOptions,
};
use crate::connection::ConnectionManager;
use crate::consumer::{Handler, Subscriber};
use crate::error::BrokerError;
use crate::producer;
use crate::protocol::Message;
use crate::transport::memory::{MemoryCluster, MemoryTransport};
use crate::transport::Transport;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};

/// Uniform publish/subscribe contract
#[async_trait]
pub trait Broker: Send + Sync {
    /// Apply configuration mutators. Must be called before [`connect`](Broker::connect).
    async fn init(&self, options: Vec<BrokerOption>) -> Result<()>;

    fn options(&self) -> BrokerOptions;

    /// First configured address
    fn address(&self) -> String;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn publish(&self, topic: &str, message: &Message) -> Result<()>;

    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: Vec<SubscribeOption>,
    ) -> Result<Subscriber>;

    fn name(&self) -> &'static str;
}

/// Broker over a partitioned commit log.
///
/// Construction performs no I/O; the connection set is created by [`Broker::connect`].
/// Disconnecting force-closes every outstanding subscription before releasing the handles.
///
/// `connect`, `disconnect`, and `init` hold the lifecycle lock exclusively. `subscribe` holds
/// it shared from looking up the connection until its subscriber is registered, so a
/// disconnect either sees the new subscription or runs before it starts.
pub struct KafkaBroker {
    connection: ConnectionManager,
    lifecycle: AsyncRwLock<()>,
    options: RwLock<BrokerOptions>,
    subscriptions: DashMap<u64, Subscriber>,
    next_subscription_id: AtomicU64,
}

impl KafkaBroker {
    pub fn with_transport<I, S>(
        addrs: I,
        options: Vec<BrokerOption>,
        transport: Arc<dyn Transport>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            connection: ConnectionManager::new(transport, BrokerConfig::new(addrs)),
            lifecycle: AsyncRwLock::new(()),
            options: RwLock::new(BrokerOptions::from_options(options)),
            subscriptions: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Broker over the production Kafka transport
    #[cfg(feature = "rdkafka")]
    pub fn new<I, S>(addrs: I, options: Vec<BrokerOption>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(
            addrs,
            options,
            Arc::new(crate::transport::kafka::KafkaTransport::new()),
        )
    }

    /// Broker over a private in-process cluster
    pub fn in_memory<I, S>(addrs: I, options: Vec<BrokerOption>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(
            addrs,
            options,
            Arc::new(MemoryTransport::new(MemoryCluster::new())),
        )
    }

    pub fn config(&self) -> &BrokerConfig {
        self.connection.config()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Subscriptions that have not been closed
    pub fn active_subscriptions(&self) -> Vec<Subscriber> {
        self.subscriptions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn close_subscriptions(&self) {
        let subscribers: Vec<Subscriber> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.subscriptions.clear();

        if subscribers.is_empty() {
            return;
        }

        debug!(count = subscribers.len(), "Closing outstanding subscriptions");
        let results = join_all(subscribers.iter().map(|s| s.unsubscribe())).await;
        for (subscriber, result) in subscribers.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    subscription = subscriber.id(),
                    topic = subscriber.topic(),
                    error = %e,
                    "Failed to close subscription"
                );
            }
        }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn init(&self, options: Vec<BrokerOption>) -> Result<()> {
        let _lifecycle = self.lifecycle.write().await;
        if self.connection.is_connected().await {
            return Err(BrokerError::invalid_config(
                "options cannot be changed while connected",
            ));
        }

        self.options.write().apply_all(options);
        Ok(())
    }

    fn options(&self) -> BrokerOptions {
        self.options.read().clone()
    }

    fn address(&self) -> String {
        self.connection.config().address().to_string()
    }

    async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.write().await;
        let options = self.options();
        self.connection.connect(&options).await
    }

    async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.write().await;
        self.close_subscriptions().await;
        self.connection.disconnect().await
    }

    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        let connection = self.connection.current().await?;
        let request_timeout = self.options.read().request_timeout;

        producer::publish(
            connection.producer.as_ref(),
            topic,
            message,
            request_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: Vec<SubscribeOption>,
    ) -> Result<Subscriber> {
        let options = SubscribeOptions::from_options(options);
        let _lifecycle = self.lifecycle.read().await;
        let connection = self.connection.current().await?;

        let consumer = connection
            .group_client
            .new_group_consumer(topic, &options.group_name)
            .await
            .map_err(|e| match e {
                BrokerError::Subscribe { .. } => e,
                other => BrokerError::subscribe(topic, other.to_string()),
            })?;

        self.subscriptions.retain(|_, s| !s.is_closed());

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (subscriber, _task) = Subscriber::start(id, topic, options, consumer, handler);
        self.subscriptions.insert(id, subscriber.clone());

        Ok(subscriber)
    }

    fn name(&self) -> &'static str {
        self.connection.transport_name()
    }
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("connection", &self.connection)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}
