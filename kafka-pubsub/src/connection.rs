//! Connection management for the broker adapter

use crate::config::{BrokerConfig, BrokerOptions};
use crate::error::BrokerError;
use crate::tls;
use crate::transport::{GroupClientHandle, ProducerHandle, RawClient, Transport};
use crate::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// The three handles of one connection, created together and released together
pub struct ConnectionSet {
    pub raw_client: Arc<dyn RawClient>,
    pub producer: Arc<dyn ProducerHandle>,
    pub group_client: Arc<dyn GroupClientHandle>,
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("addrs", &self.raw_client.addrs())
            .finish_non_exhaustive()
    }
}

/// Owns the connection set of a broker.
///
/// Connect is idempotent and all-or-nothing: a failure while building the set releases the
/// handles created so far. Disconnect closes the group client, the producer, and the raw
/// client in that order, attempts every close, and reports the first failure.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    connection: RwLock<Option<Arc<ConnectionSet>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: BrokerConfig) -> Self {
        Self {
            transport,
            config,
            connection: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Current connection set, or [`BrokerError::NotConnected`]
    pub async fn current(&self) -> Result<Arc<ConnectionSet>> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    /// Establish the connection set if it is not already live
    pub async fn connect(&self, options: &BrokerOptions) -> Result<()> {
        let mut slot = self.connection.write().await;
        if slot.is_some() {
            debug!("Already connected; skipping connect");
            return Ok(());
        }

        let addrs = self.config.addresses();
        info!(
            transport = self.transport.name(),
            addrs = %addrs.join(","),
            "Connecting to cluster"
        );

        if options.tls_requested() {
            tls::warn_unapplied(self.transport.name(), options.tls.as_ref());
        }

        let raw_client = self
            .transport
            .connect_client(addrs, options)
            .await
            .map_err(into_connection_error)?;

        let producer = match self.transport.new_producer(raw_client.as_ref(), options).await {
            Ok(producer) => producer,
            Err(e) => {
                error!(error = %e, "Failed to create producer");
                release("raw client", raw_client.close().await);
                return Err(into_connection_error(e));
            }
        };

        let group_client = match self.transport.new_group_client(addrs, options).await {
            Ok(group_client) => group_client,
            Err(e) => {
                error!(error = %e, "Failed to create consumer group client");
                release("producer", producer.close().await);
                release("raw client", raw_client.close().await);
                return Err(into_connection_error(e));
            }
        };

        *slot = Some(Arc::new(ConnectionSet {
            raw_client,
            producer,
            group_client,
        }));

        info!(transport = self.transport.name(), "Connected to cluster");
        Ok(())
    }

    /// Release the connection set. A no-op when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let connection = match self.connection.write().await.take() {
            Some(connection) => connection,
            None => {
                debug!("Not connected; skipping disconnect");
                return Ok(());
            }
        };

        let results = [
            ("group client", connection.group_client.close().await),
            ("producer", connection.producer.close().await),
            ("raw client", connection.raw_client.close().await),
        ];

        let mut first_error = None;
        for (handle, result) in results {
            if let Err(e) = result {
                warn!(handle, error = %e, "Failed to close handle");
                if first_error.is_none() {
                    first_error = Some(BrokerError::disconnect(format!(
                        "failed to close {}: {}",
                        handle, e
                    )));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(transport = self.transport.name(), "Disconnected from cluster");
                Ok(())
            }
        }
    }
}

fn into_connection_error(err: BrokerError) -> BrokerError {
    match err {
        BrokerError::Connection { .. } => err,
        other => BrokerError::connection(other.to_string()),
    }
}

fn release(handle: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(handle, error = %e, "Failed to release handle after connect failure");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryCluster, MemoryTransport};

    fn manager(cluster: &MemoryCluster) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(MemoryTransport::new(cluster.clone())),
            BrokerConfig::new(vec!["127.0.0.1:9092"]),
        )
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let cluster = MemoryCluster::new();
        let manager = manager(&cluster);
        assert!(!manager.is_connected().await);
        assert!(matches!(
            manager.current().await,
            Err(BrokerError::NotConnected)
        ));

        manager.connect(&BrokerOptions::default()).await.unwrap();
        assert!(manager.is_connected().await);
        assert_eq!(
            manager.current().await.unwrap().raw_client.addrs(),
            &["127.0.0.1:9092"]
        );

        manager.disconnect().await.unwrap();
        assert!(!manager.is_connected().await);

        // Disconnecting twice is harmless
        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let cluster = MemoryCluster::new();
        let manager = manager(&cluster);

        manager.connect(&BrokerOptions::default()).await.unwrap();
        let first = manager.current().await.unwrap();
        manager.connect(&BrokerOptions::default()).await.unwrap();
        let second = manager.current().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_failed_connect_allows_retry() {
        let cluster = MemoryCluster::new();
        let manager = manager(&cluster);

        cluster.set_available(false);
        let err = manager.connect(&BrokerOptions::default()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection { .. }));
        assert!(!manager.is_connected().await);

        cluster.set_available(true);
        manager.connect(&BrokerOptions::default()).await.unwrap();
        assert!(manager.is_connected().await);
    }
}
