//! Error types for the pub/sub broker adapter

/// Main error type for broker operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Raw client, producer, or group client could not be created
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// One or more handles failed to close
    #[error("Disconnect error: {message}")]
    Disconnect { message: String },

    /// Message could not be turned into a wire payload
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// Wire payload could not be turned back into a message
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The log rejected or failed to acknowledge a record
    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    /// Group consumer creation failed
    #[error("Subscribe to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },

    /// Operation requires a live connection set
    #[error("Broker is not connected")]
    NotConnected,

    /// Invalid configuration or option use
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Timeout errors
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No factory registered under the requested name
    #[error("No broker registered under '{name}'")]
    UnknownBroker { name: String },

    /// Errors reported by the underlying transport outside of the cases above
    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl BrokerError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new disconnect error
    pub fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::Disconnect {
            message: message.into(),
        }
    }

    /// Create an encode error
    pub fn encode<S: Into<String>>(message: S) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a publish error for `topic`
    pub fn publish<T: Into<String>, S: Into<String>>(topic: T, message: S) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a subscribe error for `topic`
    pub fn subscribe<T: Into<String>, S: Into<String>>(topic: T, message: S) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Check if this error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NotConnected)
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::publish("orders", "leader not available");
        assert_eq!(
            err.to_string(),
            "Publish to 'orders' failed: leader not available"
        );
        assert_eq!(BrokerError::NotConnected.to_string(), "Broker is not connected");
    }

    #[test]
    fn test_error_classification() {
        assert!(BrokerError::connection("refused").is_connection_error());
        assert!(BrokerError::NotConnected.is_connection_error());
        assert!(!BrokerError::decode("bad").is_connection_error());
        assert!(BrokerError::timeout(500).is_timeout());
    }
}
