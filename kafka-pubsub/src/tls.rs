//! TLS configuration slot
//!
//! Brokers accept TLS material through [`BrokerOption::Tls`](crate::BrokerOption::Tls) and
//! [`BrokerOption::Secure`](crate::BrokerOption::Secure), but no transport applies it yet:
//! connecting with TLS requested logs a warning and proceeds in plaintext.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// TLS material for client connections to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the client certificate file (PEM format)
    pub cert_path: String,

    /// Path to the client private key file (PEM format)
    pub key_path: String,

    /// Path to the CA certificate used to verify brokers (optional)
    pub ca_cert_path: Option<String>,
}

impl TlsConfig {
    /// Create a new TLS configuration
    pub fn new<P: Into<String>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: None,
        }
    }

    /// Verify brokers against a specific CA
    pub fn with_ca_cert<P: Into<String>>(mut self, ca_cert_path: P) -> Self {
        self.ca_cert_path = Some(ca_cert_path.into());
        self
    }
}

/// Report that requested TLS settings are not applied by `transport`
pub(crate) fn warn_unapplied(transport: &str, tls: Option<&TlsConfig>) {
    match tls {
        Some(config) => warn!(
            transport,
            cert_path = %config.cert_path,
            "TLS configuration accepted but not applied; connecting without encryption"
        ),
        None => warn!(
            transport,
            "Secure transport requested but not applied; connecting without encryption"
        ),
    }
}
