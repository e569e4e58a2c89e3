//! Kafka transport backed by librdkafka
//!
//! - raw client: a group-less `BaseConsumer` used to probe cluster metadata on connect
//! - producer: a `FutureProducer` built from the raw client's bootstrap servers
//! - group client: hands out one subscribed `StreamConsumer` per subscription, with
//!   `enable.auto.commit=true` and `auto.offset.reset=earliest`
//!
//! librdkafka releases its resources on drop, so closing a handle drops the inner client
//! once no operation still holds it.

use super::{GroupClientHandle, GroupConsumer, ProducerHandle, RawClient, Transport};
use crate::config::BrokerOptions;
use crate::error::BrokerError;
use crate::protocol::{ConsumedRecord, RecordMetadata};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

static ANONYMOUS_GROUPS: AtomicU64 = AtomicU64::new(0);

/// [`Transport`] over librdkafka
#[derive(Debug, Clone, Default)]
pub struct KafkaTransport;

impl KafkaTransport {
    pub fn new() -> Self {
        Self
    }
}

fn client_config(addrs: &[String], options: &BrokerOptions) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", addrs.join(","))
        .set(
            "socket.connection.setup.timeout.ms",
            options.connection_timeout.as_millis().to_string(),
        );
    if let Some(client_id) = &options.client_id {
        config.set("client.id", client_id);
    }
    config
}

fn anonymous_group() -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "kafka-pubsub-{}-{}-{}",
        std::process::id(),
        started,
        ANONYMOUS_GROUPS.fetch_add(1, Ordering::Relaxed)
    )
}

#[async_trait]
impl Transport for KafkaTransport {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn connect_client(
        &self,
        addrs: &[String],
        options: &BrokerOptions,
    ) -> Result<Arc<dyn RawClient>> {
        let consumer: BaseConsumer = client_config(addrs, options)
            .create()
            .map_err(|e| BrokerError::connection(format!("failed to create client: {}", e)))?;

        let timeout = options.connection_timeout;
        let consumer = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|metadata| (metadata.brokers().len(), metadata.topics().len()))
                .map(|counts| (consumer, counts))
        })
        .await
        .map_err(|e| BrokerError::connection(format!("metadata probe aborted: {}", e)))?
        .map(|(consumer, (brokers, topics))| {
            info!(brokers, topics, "Fetched cluster metadata");
            consumer
        })
        .map_err(|e| BrokerError::connection(format!("failed to reach cluster: {}", e)))?;

        Ok(Arc::new(KafkaClient {
            addrs: addrs.to_vec(),
            consumer: Mutex::new(Some(consumer)),
        }))
    }

    async fn new_producer(
        &self,
        client: &dyn RawClient,
        options: &BrokerOptions,
    ) -> Result<Arc<dyn ProducerHandle>> {
        let producer: FutureProducer = client_config(client.addrs(), options)
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                options.request_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BrokerError::connection(format!("failed to create producer: {}", e)))?;

        Ok(Arc::new(KafkaProducer {
            producer: Mutex::new(Some(producer)),
            request_timeout: options.request_timeout,
        }))
    }

    async fn new_group_client(
        &self,
        addrs: &[String],
        options: &BrokerOptions,
    ) -> Result<Arc<dyn GroupClientHandle>> {
        let mut config = client_config(addrs, options);
        config
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000");

        Ok(Arc::new(KafkaGroupClient {
            config: Mutex::new(Some(config)),
        }))
    }
}

struct KafkaClient {
    addrs: Vec<String>,
    consumer: Mutex<Option<BaseConsumer>>,
}

#[async_trait]
impl RawClient for KafkaClient {
    fn addrs(&self) -> &[String] {
        &self.addrs
    }

    async fn close(&self) -> Result<()> {
        let consumer = self.consumer.lock().take();
        if consumer.is_some() {
            debug!("Closing raw client");
        }
        Ok(())
    }
}

struct KafkaProducer {
    producer: Mutex<Option<FutureProducer>>,
    request_timeout: Duration,
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn send(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata> {
        let producer = self
            .producer
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::publish(topic, "producer is closed"))?;

        let record = FutureRecord::<(), [u8]>::to(topic).payload(&payload[..]);
        let (partition, offset) = producer
            .send(record, Timeout::After(self.request_timeout))
            .await
            .map_err(|(e, _)| BrokerError::publish(topic, e.to_string()))?;

        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn close(&self) -> Result<()> {
        let producer = match self.producer.lock().take() {
            Some(producer) => producer,
            None => return Ok(()),
        };

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| BrokerError::disconnect(format!("producer flush aborted: {}", e)))?
            .map_err(|e| BrokerError::disconnect(format!("producer flush failed: {}", e)))
    }
}

struct KafkaGroupClient {
    config: Mutex<Option<ClientConfig>>,
}

impl KafkaGroupClient {
    fn join(&self, topic: &str, group: &str) -> Result<KafkaGroupConsumer> {
        let mut config = self
            .config
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::subscribe(topic, "group client is closed"))?;

        let group = if group.is_empty() {
            anonymous_group()
        } else {
            group.to_string()
        };

        let consumer: StreamConsumer = config
            .set("group.id", &group)
            .create()
            .map_err(|e| BrokerError::subscribe(topic, e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::subscribe(topic, e.to_string()))?;

        info!(topic, group = %group, "Joined consumer group");
        Ok(KafkaGroupConsumer {
            consumer: Mutex::new(Some(Arc::new(consumer))),
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl GroupClientHandle for KafkaGroupClient {
    async fn new_group_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn GroupConsumer>> {
        Ok(Arc::new(self.join(topic, group)?))
    }

    async fn close(&self) -> Result<()> {
        self.config.lock().take();
        Ok(())
    }
}

/// Closing drops the `StreamConsumer`, which leaves the group once an in-flight `recv`
/// has been cancelled.
struct KafkaGroupConsumer {
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl GroupConsumer for KafkaGroupConsumer {
    async fn recv(&self) -> Option<Result<ConsumedRecord>> {
        let consumer = self.consumer.lock().clone()?;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            message = consumer.recv() => Some(
                message
                    .map(|m| ConsumedRecord {
                        topic: m.topic().to_string(),
                        partition: m.partition(),
                        offset: m.offset(),
                        payload: Bytes::copy_from_slice(m.payload().unwrap_or_default()),
                    })
                    .map_err(|e| BrokerError::transport(e.to_string())),
            ),
        }
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            consumer.unsubscribe();
            debug!("Closing group consumer");
        }
        Ok(())
    }
}
