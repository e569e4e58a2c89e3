use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Registry name of the broker to create
    pub broker: String,
    /// Comma-separated bootstrap addresses
    pub addrs: String,
    pub topic: String,
    pub group: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: "memory".to_string(),
            addrs: "127.0.0.1:9092".to_string(),
            topic: "orders".to_string(),
            group: "g1".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker: std::env::var("PUBSUB_BROKER").unwrap_or(defaults.broker),
            addrs: std::env::var("PUBSUB_ADDRS").unwrap_or(defaults.addrs),
            topic: std::env::var("PUBSUB_TOPIC").unwrap_or(defaults.topic),
            group: std::env::var("PUBSUB_GROUP").unwrap_or(defaults.group),
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addrs
            .split(',')
            .map(|addr| addr.trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_split() {
        let config = Config {
            addrs: "broker1:9092, ,broker2:9092".to_string(),
            ..Config::default()
        };
        assert_eq!(config.addresses(), vec!["broker1:9092", "broker2:9092"]);
    }
}
