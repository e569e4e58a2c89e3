//! Publisher: encodes messages and sends them through the producer handle

use crate::codec;
use crate::error::BrokerError;
use crate::protocol::{Message, RecordMetadata};
use crate::transport::ProducerHandle;
use crate::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Encode `message` and append it to `topic`.
///
/// Resolves only once the cluster acknowledged the record, or fails. Nothing is buffered or
/// retried here; retry policy belongs to the producer handle's own configuration.
pub async fn publish(
    producer: &dyn ProducerHandle,
    topic: &str,
    message: &Message,
    request_timeout: Duration,
) -> Result<RecordMetadata> {
    let payload = codec::encode(message)?;
    let size = payload.len();

    let metadata = match timeout(request_timeout, producer.send(topic, payload)).await {
        Ok(Ok(metadata)) => metadata,
        Ok(Err(e)) => {
            error!(topic, error = %e, "Failed to publish message");
            return Err(match e {
                BrokerError::Publish { .. } | BrokerError::Timeout { .. } => e,
                other => BrokerError::publish(topic, other.to_string()),
            });
        }
        Err(_) => {
            error!(topic, timeout_ms = request_timeout.as_millis() as u64, "Publish timed out");
            return Err(BrokerError::timeout(request_timeout.as_millis() as u64));
        }
    };

    debug!(
        topic,
        partition = metadata.partition,
        offset = metadata.offset,
        size,
        "Message published"
    );
    Ok(metadata)
}
