//! Named broker factories
//!
//! Hosts build a registry once during setup and look brokers up by name afterwards. The
//! registry is immutable after [`BrokerRegistryBuilder::build`].

use crate::broker::{Broker, KafkaBroker};
use crate::config::BrokerOption;
use crate::error::BrokerError;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Constructs a broker from an address list and options without performing I/O
pub type BrokerFactory = fn(Vec<String>, Vec<BrokerOption>) -> Arc<dyn Broker>;

/// Immutable mapping from broker name to factory
#[derive(Debug, Clone, Default)]
pub struct BrokerRegistry {
    factories: HashMap<String, BrokerFactory>,
}

impl BrokerRegistry {
    pub fn builder() -> BrokerRegistryBuilder {
        BrokerRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<BrokerFactory> {
        self.factories.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the broker registered under `name`
    pub fn create(
        &self,
        name: &str,
        addrs: Vec<String>,
        options: Vec<BrokerOption>,
    ) -> Result<Arc<dyn Broker>> {
        let factory = self.get(name).ok_or_else(|| BrokerError::UnknownBroker {
            name: name.to_string(),
        })?;
        Ok(factory(addrs, options))
    }
}

#[derive(Debug, Default)]
pub struct BrokerRegistryBuilder {
    factories: HashMap<String, BrokerFactory>,
}

impl BrokerRegistryBuilder {
    /// Register `factory` under `name`, replacing any earlier registration
    pub fn register<S: Into<String>>(mut self, name: S, factory: BrokerFactory) -> Self {
        let name = name.into();
        debug!(broker = %name, "Registering broker factory");
        self.factories.insert(name, factory);
        self
    }

    pub fn build(self) -> BrokerRegistry {
        BrokerRegistry {
            factories: self.factories,
        }
    }
}

fn memory_broker(addrs: Vec<String>, options: Vec<BrokerOption>) -> Arc<dyn Broker> {
    Arc::new(KafkaBroker::in_memory(addrs, options))
}

#[cfg(feature = "rdkafka")]
fn kafka_broker(addrs: Vec<String>, options: Vec<BrokerOption>) -> Arc<dyn Broker> {
    Arc::new(KafkaBroker::new(addrs, options))
}

/// Register the brokers this crate provides: `"memory"` always, `"kafka"` with the
/// `rdkafka` feature.
pub fn register_brokers(builder: BrokerRegistryBuilder) -> BrokerRegistryBuilder {
    let builder = builder.register("memory", memory_broker);

    #[cfg(feature = "rdkafka")]
    let builder = builder.register("kafka", kafka_broker);

    builder
}
