//! In-process partitioned log with consumer-group semantics.
//!
//! Behaves like a small single-node Kafka cluster:
//!
//! - topics are created on first use with a fixed partition count
//! - records are spread round-robin over partitions and keep their order within a partition
//! - partitions of a topic are assigned round-robin across the members of a group, and a
//!   membership change rebalances them
//! - a new group starts at the earliest retained offset
//! - offsets are committed as records are handed out (auto-commit on fetch)
//!
//! [`MemoryCluster::set_available`] simulates an unreachable cluster.

use super::{GroupClientHandle, GroupConsumer, ProducerHandle, RawClient, Transport};
use crate::config::BrokerOptions;
use crate::error::BrokerError;
use crate::protocol::{ConsumedRecord, Offset, PartitionId, RecordMetadata, TopicName};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Partition count for auto-created topics
pub const DEFAULT_PARTITIONS: usize = 3;

const MAX_TOPIC_NAME_LEN: usize = 249;

/// Shared handle to an in-process cluster
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

#[derive(Debug)]
struct ClusterInner {
    partitions_per_topic: usize,
    topics: DashMap<TopicName, Arc<TopicLog>>,
    groups: DashMap<(TopicName, String), Arc<Mutex<GroupState>>>,
    available: AtomicBool,
    next_member_id: AtomicU64,
}

#[derive(Debug)]
struct TopicLog {
    name: TopicName,
    partitions: RwLock<Vec<Vec<Bytes>>>,
    next_partition: AtomicUsize,
    /// Woken on append, membership change, and availability change
    changed: Notify,
}

#[derive(Debug)]
struct GroupState {
    members: Vec<u64>,
    committed: Vec<usize>,
    cursor: usize,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions_per_topic: usize) -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                partitions_per_topic: partitions_per_topic.max(1),
                topics: DashMap::new(),
                groups: DashMap::new(),
                available: AtomicBool::new(true),
                next_member_id: AtomicU64::new(1),
            }),
        }
    }

    /// Toggle reachability. While unavailable, connects, sends, and joins fail and no
    /// records are handed out.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        if available {
            for entry in self.inner.topics.iter() {
                entry.value().changed.notify_waiters();
            }
        }
        info!(available, "Memory cluster availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Total records retained for `topic` across partitions
    pub fn record_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|log| log.partitions.read().iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Committed offset per partition for `group` on `topic`
    pub fn committed_offsets(&self, topic: &str, group: &str) -> Option<Vec<Offset>> {
        self.inner
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|state| {
                state
                    .lock()
                    .committed
                    .iter()
                    .map(|offset| *offset as Offset)
                    .collect()
            })
    }

    /// Number of groups currently tracked for `topic`
    pub fn group_count(&self, topic: &str) -> usize {
        self.inner
            .groups
            .iter()
            .filter(|entry| entry.key().0 == topic)
            .count()
    }

    /// Number of live members in `group` on `topic`
    pub fn member_count(&self, topic: &str, group: &str) -> usize {
        self.inner
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|state| state.lock().members.len())
            .unwrap_or(0)
    }

    fn append(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata> {
        if !self.is_available() {
            return Err(BrokerError::publish(topic, "cluster unavailable"));
        }
        validate_topic(topic).map_err(|reason| BrokerError::publish(topic, reason))?;

        let log = self.topic(topic);
        let (partition, offset) = {
            let mut partitions = log.partitions.write();
            let partition =
                log.next_partition.fetch_add(1, Ordering::Relaxed) % partitions.len();
            partitions[partition].push(payload);
            (partition, partitions[partition].len() - 1)
        };
        log.changed.notify_waiters();

        debug!(topic, partition, offset, "Appended record");
        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition: partition as PartitionId,
            offset: offset as Offset,
        })
    }

    fn topic(&self, topic: &str) -> Arc<TopicLog> {
        self.inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic, partitions = self.inner.partitions_per_topic, "Created topic");
                Arc::new(TopicLog {
                    name: topic.to_string(),
                    partitions: RwLock::new(vec![Vec::new(); self.inner.partitions_per_topic]),
                    next_partition: AtomicUsize::new(0),
                    changed: Notify::new(),
                })
            })
            .clone()
    }

    fn join(&self, topic: &str, group: &str) -> Result<MemoryGroupConsumer> {
        if !self.is_available() {
            return Err(BrokerError::subscribe(topic, "cluster unavailable"));
        }
        validate_topic(topic).map_err(|reason| BrokerError::subscribe(topic, reason))?;

        let log = self.topic(topic);
        let member_id = self.inner.next_member_id.fetch_add(1, Ordering::Relaxed);
        let anonymous = group.is_empty();
        let group = if anonymous {
            format!("anonymous-{}", member_id)
        } else {
            group.to_string()
        };

        let partition_count = log.partitions.read().len();
        let state = self
            .inner
            .groups
            .entry((topic.to_string(), group.clone()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(GroupState {
                    members: Vec::new(),
                    committed: vec![0; partition_count],
                    cursor: 0,
                }))
            })
            .clone();

        {
            let mut state = state.lock();
            state.members.push(member_id);
            state.members.sort_unstable();
        }
        log.changed.notify_waiters();

        info!(topic, group = %group, member_id, "Member joined group");
        Ok(MemoryGroupConsumer {
            cluster: self.clone(),
            log,
            group,
            anonymous,
            state,
            member_id,
            left: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }
}

fn validate_topic(topic: &str) -> std::result::Result<(), String> {
    if topic.is_empty() {
        return Err("topic name must not be empty".to_string());
    }
    if topic.len() > MAX_TOPIC_NAME_LEN {
        return Err(format!(
            "topic name exceeds {} characters",
            MAX_TOPIC_NAME_LEN
        ));
    }
    if topic == "." || topic == ".." {
        return Err(format!("'{}' is not a legal topic name", topic));
    }
    if let Some(c) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!("illegal character '{}' in topic name", c));
    }
    Ok(())
}

/// [`Transport`] over a [`MemoryCluster`]
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    cluster: MemoryCluster,
}

impl MemoryTransport {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect_client(
        &self,
        addrs: &[String],
        _options: &BrokerOptions,
    ) -> Result<Arc<dyn RawClient>> {
        if !self.cluster.is_available() {
            return Err(BrokerError::connection(format!(
                "no brokers available at {}",
                addrs.join(",")
            )));
        }

        Ok(Arc::new(MemoryClient {
            addrs: addrs.to_vec(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn new_producer(
        &self,
        client: &dyn RawClient,
        _options: &BrokerOptions,
    ) -> Result<Arc<dyn ProducerHandle>> {
        debug!(addrs = ?client.addrs(), "Creating memory producer");
        Ok(Arc::new(MemoryProducer {
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn new_group_client(
        &self,
        addrs: &[String],
        _options: &BrokerOptions,
    ) -> Result<Arc<dyn GroupClientHandle>> {
        if !self.cluster.is_available() {
            return Err(BrokerError::connection(format!(
                "no group coordinator available at {}",
                addrs.join(",")
            )));
        }

        Ok(Arc::new(MemoryGroupClient {
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct MemoryClient {
    addrs: Vec<String>,
    closed: AtomicBool,
}

#[async_trait]
impl RawClient for MemoryClient {
    fn addrs(&self) -> &[String] {
        &self.addrs
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryProducer {
    cluster: MemoryCluster,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerHandle for MemoryProducer {
    async fn send(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::publish(topic, "producer is closed"));
        }
        self.cluster.append(topic, payload)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryGroupClient {
    cluster: MemoryCluster,
    closed: AtomicBool,
}

#[async_trait]
impl GroupClientHandle for MemoryGroupClient {
    async fn new_group_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn GroupConsumer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::subscribe(topic, "group client is closed"));
        }
        Ok(Arc::new(self.cluster.join(topic, group)?))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Group member handed out by the memory group client
#[derive(Debug)]
pub struct MemoryGroupConsumer {
    cluster: MemoryCluster,
    log: Arc<TopicLog>,
    group: String,
    anonymous: bool,
    state: Arc<Mutex<GroupState>>,
    member_id: u64,
    left: AtomicBool,
    cancel: CancellationToken,
}

impl MemoryGroupConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    fn try_fetch(&self) -> Option<ConsumedRecord> {
        if !self.cluster.is_available() {
            return None;
        }

        let partitions = self.log.partitions.read();
        let mut state = self.state.lock();
        let member_index = state.members.iter().position(|id| *id == self.member_id)?;
        let member_count = state.members.len();
        let partition_count = partitions.len();

        for step in 0..partition_count {
            let partition = (state.cursor + step) % partition_count;
            if partition % member_count != member_index {
                continue;
            }

            let offset = state.committed[partition];
            if let Some(payload) = partitions[partition].get(offset) {
                state.committed[partition] = offset + 1;
                state.cursor = partition + 1;
                return Some(ConsumedRecord {
                    topic: self.log.name.clone(),
                    partition: partition as PartitionId,
                    offset: offset as Offset,
                    payload: payload.clone(),
                });
            }
        }

        None
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        let empty = {
            let mut state = self.state.lock();
            state.members.retain(|id| *id != self.member_id);
            state.members.is_empty()
        };
        // A private group cannot be rejoined
        if self.anonymous && empty {
            self.cluster
                .inner
                .groups
                .remove(&(self.log.name.clone(), self.group.clone()));
        }
        self.log.changed.notify_waiters();
        info!(
            topic = %self.log.name,
            group = %self.group,
            member_id = self.member_id,
            "Member left group"
        );
    }
}

#[async_trait]
impl GroupConsumer for MemoryGroupConsumer {
    async fn recv(&self) -> Option<Result<ConsumedRecord>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            // Registered before the fetch attempt so an append in between is not missed.
            let changed = self.log.changed.notified();
            if let Some(record) = self.try_fetch() {
                return Some(Ok(record));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = changed => {}
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.leave();
        Ok(())
    }
}

impl Drop for MemoryGroupConsumer {
    fn drop(&mut self) {
        self.leave();
    }
}
