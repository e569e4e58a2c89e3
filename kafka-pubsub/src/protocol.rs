//! Message and record types exchanged with the broker

use bytes::Bytes;
use std::collections::HashMap;

pub type TopicName = String;
pub type PartitionId = i32;
pub type Offset = i64;

/// Application message: string headers plus an opaque body.
///
/// The whole message, headers included, is the wire payload. The topic travels out-of-band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: HashMap<String, String>,
    pub body: Bytes,
}

impl Message {
    /// Create a message with no headers
    pub fn new<B: Into<Bytes>>(body: B) -> Self {
        Self {
            header: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }
}

/// A received message as handed to a subscription handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    topic: TopicName,
    message: Message,
}

impl Publication {
    pub fn new<T: Into<TopicName>>(topic: T, message: Message) -> Self {
        Self {
            topic: topic.into(),
            message,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Acknowledge the publication.
    ///
    /// Always a no-op: offsets are committed by the group consumer's own auto-commit, so
    /// delivery is at-most-once with respect to this call whatever `auto_ack` is set to.
    pub fn ack(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// Raw record yielded by a group consumer before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub payload: Bytes,
}

/// Position of an acknowledged record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
}
