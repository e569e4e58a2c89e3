//! Publish/subscribe round trip
//!
//! Subscribes to a topic through a broker created by name from the registry, publishes a
//! batch of messages stamped with their send time, and reports delivery latency once every
//! message has come back or the wait times out.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use kafka_pubsub::{
    handler, register_brokers, BrokerOption, BrokerRegistry, Message, Publication,
    SubscribeOption,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const SENT_AT_HEADER: &str = "sent_at_ms";

#[derive(Debug, Parser)]
#[command(name = "pubsub-demo", about = "Publish/subscribe round trip through a named broker")]
struct Args {
    /// Broker name in the registry [env: PUBSUB_BROKER]
    #[arg(long)]
    broker: Option<String>,

    /// Comma-separated broker addresses [env: PUBSUB_ADDRS]
    #[arg(long)]
    addrs: Option<String>,

    /// Topic to publish to and subscribe on [env: PUBSUB_TOPIC]
    #[arg(long)]
    topic: Option<String>,

    /// Consumer group name [env: PUBSUB_GROUP]
    #[arg(long)]
    group: Option<String>,

    /// Number of messages to publish
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    /// Seconds to wait for every message to come back
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(broker) = &self.broker {
            config.broker = broker.clone();
        }
        if let Some(addrs) = &self.addrs {
            config.addrs = addrs.clone();
        }
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(group) = &self.group {
            config.group = group.clone();
        }
        config
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let config = args.config();
    let registry = register_brokers(BrokerRegistry::builder()).build();

    info!("=== Pub/Sub Round Trip ===");
    info!("Broker: {} (registered: {})", config.broker, registry.names().join(", "));
    info!("Addresses: {}", config.addrs);
    info!("Topic: {}, group: {}", config.topic, config.group);

    let broker = registry
        .create(
            &config.broker,
            config.addresses(),
            vec![BrokerOption::client_id("pubsub-demo")],
        )
        .context("Failed to create broker")?;
    broker.connect().await.context("Failed to connect")?;
    info!("Connected to {}", broker.address());

    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
    let subscriber = broker
        .subscribe(
            &config.topic,
            handler(move |publication: &Publication| {
                let received_at = now_ms();
                let sent_at = publication
                    .message()
                    .header(SENT_AT_HEADER)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(received_at);
                let _ = tx.send(received_at.saturating_sub(sent_at));
                publication.ack()
            }),
            vec![SubscribeOption::queue(config.group.clone())],
        )
        .await
        .context("Failed to subscribe")?;

    for i in 0..args.count {
        let message = Message::new(format!("message {}", i))
            .with_header(SENT_AT_HEADER, now_ms().to_string())
            .with_header("seq", i.to_string());
        if let Err(e) = broker.publish(&config.topic, &message).await {
            error!("Publish {} failed: {}", i, e);
        }
    }
    info!("Published {} messages", args.count);

    let mut latencies = Vec::with_capacity(args.count);
    let deadline = tokio::time::sleep(Duration::from_secs(args.wait_secs));
    tokio::pin!(deadline);
    while latencies.len() < args.count {
        tokio::select! {
            _ = &mut deadline => {
                warn!("Timeout waiting for messages. Received {}/{}", latencies.len(), args.count);
                break;
            }
            latency = rx.recv() => match latency {
                Some(latency) => latencies.push(latency),
                None => break,
            },
        }
    }

    subscriber.unsubscribe().await.context("Failed to unsubscribe")?;
    broker.disconnect().await.context("Failed to disconnect")?;

    print_statistics(&mut latencies, args.count);
    if latencies.len() < args.count {
        bail!("received {} of {} messages", latencies.len(), args.count);
    }
    Ok(())
}

fn print_statistics(values: &mut [u64], expected: usize) {
    info!("=== Round Trip Results ===");
    info!("Expected: {}, received: {}", expected, values.len());

    if values.is_empty() {
        warn!("No latency data collected!");
        return;
    }

    values.sort_unstable();
    let avg = values.iter().sum::<u64>() as f64 / values.len() as f64;
    let p95 = values[((values.len() as f64 * 0.95) as usize).min(values.len() - 1)];

    info!("Min:     {} ms", values[0]);
    info!("Avg:     {:.2} ms", avg);
    info!("P50:     {} ms", values[values.len() / 2]);
    info!("P95:     {} ms", p95);
    info!("Max:     {} ms", values[values.len() - 1]);
}
