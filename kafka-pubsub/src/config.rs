//! Configuration types for the broker adapter

use crate::tls::TlsConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Address used when no usable broker address is configured
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9092";

/// Resolved broker address set.
///
/// Blank entries are dropped and an empty result falls back to [`DEFAULT_ADDRESS`], so a
/// `BrokerConfig` always holds at least one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    addresses: Vec<String>,
}

impl BrokerConfig {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut resolved: Vec<String> = addresses
            .into_iter()
            .map(|s| s.into())
            .filter(|addr| !addr.trim().is_empty())
            .collect();

        if resolved.is_empty() {
            resolved.push(DEFAULT_ADDRESS.to_string());
        }

        Self {
            addresses: resolved,
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// First configured address
    pub fn address(&self) -> &str {
        self.addresses
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_ADDRESS)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

/// Client-level options shared by every handle of a connection set
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Client identifier reported to the cluster
    pub client_id: Option<String>,
    /// Upper bound for establishing the raw client
    pub connection_timeout: Duration,
    /// Upper bound for a single acknowledged send
    pub request_timeout: Duration,
    /// Request an encrypted transport. Accepted but not yet applied.
    pub secure: bool,
    /// TLS material. Accepted but not yet applied.
    pub tls: Option<TlsConfig>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            secure: false,
            tls: None,
        }
    }
}

impl BrokerOptions {
    /// Build options from a sequence of mutators applied in order
    pub fn from_options<I: IntoIterator<Item = BrokerOption>>(options: I) -> Self {
        let mut opts = Self::default();
        opts.apply_all(options);
        opts
    }

    pub fn apply_all<I: IntoIterator<Item = BrokerOption>>(&mut self, options: I) {
        for option in options {
            option.apply(self);
        }
    }

    /// TLS is requested either explicitly or by supplying TLS material
    pub fn tls_requested(&self) -> bool {
        self.secure || self.tls.is_some()
    }
}

/// A single configuration mutator for [`BrokerOptions`]
#[derive(Debug, Clone)]
pub enum BrokerOption {
    ClientId(String),
    ConnectionTimeout(Duration),
    RequestTimeout(Duration),
    Secure(bool),
    Tls(TlsConfig),
}

impl BrokerOption {
    pub fn client_id<S: Into<String>>(client_id: S) -> Self {
        Self::ClientId(client_id.into())
    }

    pub fn apply(self, opts: &mut BrokerOptions) {
        match self {
            Self::ClientId(client_id) => opts.client_id = Some(client_id),
            Self::ConnectionTimeout(timeout) => opts.connection_timeout = timeout,
            Self::RequestTimeout(timeout) => opts.request_timeout = timeout,
            Self::Secure(secure) => opts.secure = secure,
            Self::Tls(tls) => {
                opts.secure = true;
                opts.tls = Some(tls);
            }
        }
    }
}

/// Per-subscription options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Consumer group name. Empty means a private group per subscription.
    pub group_name: String,
    /// Recorded for callers; acknowledgement is a no-op either way.
    pub auto_ack: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            group_name: String::new(),
            auto_ack: true,
        }
    }
}

impl SubscribeOptions {
    pub fn from_options<I: IntoIterator<Item = SubscribeOption>>(options: I) -> Self {
        let mut opts = Self::default();
        for option in options {
            option.apply(&mut opts);
        }
        opts
    }
}

/// A single configuration mutator for [`SubscribeOptions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOption {
    /// Join the named consumer group
    Queue(String),
    DisableAutoAck,
}

impl SubscribeOption {
    pub fn queue<S: Into<String>>(group_name: S) -> Self {
        Self::Queue(group_name.into())
    }

    pub fn apply(self, opts: &mut SubscribeOptions) {
        match self {
            Self::Queue(group_name) => opts.group_name = group_name,
            Self::DisableAutoAck => opts.auto_ack = false,
        }
    }
}
