#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use kafka_pubsub::transport::{
    GroupClientHandle, GroupConsumer, ProducerHandle, RawClient, Transport,
};
use kafka_pubsub::{BrokerError, BrokerOptions, ConsumedRecord, RecordMetadata, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A handle of the connection set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RawClient,
    Producer,
    GroupClient,
}

#[derive(Debug, Default)]
pub struct Counters {
    created: AtomicUsize,
    closed: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Faults {
    create: Option<Step>,
    close: Vec<Step>,
}

/// Transport that counts every handle it creates and closes, and fails on demand
#[derive(Debug, Default)]
pub struct RecordingTransport {
    raw_client: Arc<Counters>,
    producer: Arc<Counters>,
    group_client: Arc<Counters>,
    faults: Arc<Mutex<Faults>>,
    close_order: Arc<Mutex<Vec<Step>>>,
    send_delay: Mutex<Option<Duration>>,
    join_delay: Mutex<Option<Duration>>,
    consumers: Arc<Counters>,
    seen_client_ids: Mutex<Vec<Option<String>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counters(&self, step: Step) -> &Counters {
        match step {
            Step::RawClient => &self.raw_client,
            Step::Producer => &self.producer,
            Step::GroupClient => &self.group_client,
        }
    }

    /// Fail creation of `step` on the next connects
    pub fn fail_create(&self, step: Option<Step>) {
        self.faults.lock().create = step;
    }

    /// Fail closing the listed handles
    pub fn fail_close(&self, steps: Vec<Step>) {
        self.faults.lock().close = steps;
    }

    /// Delay every producer send by `delay`
    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock() = Some(delay);
    }

    /// Delay every group consumer creation by `delay`
    pub fn delay_joins(&self, delay: Duration) {
        *self.join_delay.lock() = Some(delay);
    }

    /// Group consumers handed out and closed so far
    pub fn consumers(&self) -> &Counters {
        &self.consumers
    }

    /// Client id of the options each raw client was created with
    pub fn seen_client_ids(&self) -> Vec<Option<String>> {
        self.seen_client_ids.lock().clone()
    }

    pub fn close_order(&self) -> Vec<Step> {
        self.close_order.lock().clone()
    }

    fn create(&self, step: Step) -> Result<Closer> {
        if self.faults.lock().create == Some(step) {
            return Err(BrokerError::transport(format!("{:?} refused", step)));
        }
        let counters = match step {
            Step::RawClient => self.raw_client.clone(),
            Step::Producer => self.producer.clone(),
            Step::GroupClient => self.group_client.clone(),
        };
        counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Closer {
            step,
            counters,
            faults: self.faults.clone(),
            close_order: self.close_order.clone(),
        })
    }
}

struct Closer {
    step: Step,
    counters: Arc<Counters>,
    faults: Arc<Mutex<Faults>>,
    close_order: Arc<Mutex<Vec<Step>>>,
}

impl Closer {
    fn close(&self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.close_order.lock().push(self.step);
        if self.faults.lock().close.contains(&self.step) {
            return Err(BrokerError::transport(format!("{:?} close failed", self.step)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn connect_client(
        &self,
        addrs: &[String],
        options: &BrokerOptions,
    ) -> Result<Arc<dyn RawClient>> {
        self.seen_client_ids.lock().push(options.client_id.clone());
        Ok(Arc::new(FakeClient {
            addrs: addrs.to_vec(),
            closer: self.create(Step::RawClient)?,
        }))
    }

    async fn new_producer(
        &self,
        _client: &dyn RawClient,
        _options: &BrokerOptions,
    ) -> Result<Arc<dyn ProducerHandle>> {
        Ok(Arc::new(FakeProducer {
            closer: self.create(Step::Producer)?,
            delay: *self.send_delay.lock(),
        }))
    }

    async fn new_group_client(
        &self,
        _addrs: &[String],
        _options: &BrokerOptions,
    ) -> Result<Arc<dyn GroupClientHandle>> {
        Ok(Arc::new(FakeGroupClient {
            closer: self.create(Step::GroupClient)?,
            join_delay: *self.join_delay.lock(),
            consumers: self.consumers.clone(),
        }))
    }
}

struct FakeClient {
    addrs: Vec<String>,
    closer: Closer,
}

#[async_trait]
impl RawClient for FakeClient {
    fn addrs(&self) -> &[String] {
        &self.addrs
    }

    async fn close(&self) -> Result<()> {
        self.closer.close()
    }
}

struct FakeProducer {
    closer: Closer,
    delay: Option<Duration>,
}

#[async_trait]
impl ProducerHandle for FakeProducer {
    async fn send(&self, topic: &str, _payload: Bytes) -> Result<RecordMetadata> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closer.close()
    }
}

struct FakeGroupClient {
    closer: Closer,
    join_delay: Option<Duration>,
    consumers: Arc<Counters>,
}

#[async_trait]
impl GroupClientHandle for FakeGroupClient {
    async fn new_group_consumer(
        &self,
        _topic: &str,
        _group: &str,
    ) -> Result<Arc<dyn GroupConsumer>> {
        if let Some(delay) = self.join_delay {
            tokio::time::sleep(delay).await;
        }
        self.consumers.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(IdleConsumer {
            cancel: tokio_util::sync::CancellationToken::new(),
            consumers: self.consumers.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closer.close()
    }
}

/// Group consumer that never yields a record
struct IdleConsumer {
    cancel: tokio_util::sync::CancellationToken,
    consumers: Arc<Counters>,
}

#[async_trait]
impl GroupConsumer for IdleConsumer {
    async fn recv(&self) -> Option<Result<ConsumedRecord>> {
        self.cancel.cancelled().await;
        None
    }

    async fn close(&self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.consumers.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
