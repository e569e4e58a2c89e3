//! Subscriber: one group consumer and one delivery loop per subscription
//!
//! The loop waits for the next record, decodes it, and calls the handler before asking for
//! the next one, so a slow handler throttles its own subscription. Records that fail to
//! decode are skipped. Handler errors are logged and otherwise ignored.
//!
//! Lifecycle: `Created -> Running -> Closed`. While a handler runs the subscription is in an
//! internal `Dispatching` state; [`Subscriber::unsubscribe`] moves it to `Closed`, after which
//! no new handler call starts. A call already in progress is allowed to finish.

use crate::codec;
use crate::config::SubscribeOptions;
use crate::protocol::Publication;
use crate::transport::GroupConsumer;
use crate::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback invoked once per delivered publication.
///
/// The handler runs inline on the subscription's tokio task, so it must not block: a blocking
/// call stalls the worker thread and every task scheduled on it. Hand long or blocking work
/// to `tokio::task::spawn_blocking` or a channel and return.
pub type Handler = Arc<dyn Fn(&Publication) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Publication) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const DISPATCHING: u8 = 2;
const CLOSED: u8 = 3;

/// Observable subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Running,
    Closed,
}

struct SubscriptionInner {
    id: u64,
    topic: String,
    options: SubscribeOptions,
    consumer: Arc<dyn GroupConsumer>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl SubscriptionInner {
    /// Running -> Dispatching. Fails once the subscription is closed.
    fn begin_dispatch(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, DISPATCHING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Dispatching -> Running. Fails if the subscription was closed mid-dispatch.
    fn end_dispatch(&self) -> bool {
        self.state
            .compare_exchange(DISPATCHING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to an active subscription.
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriptionInner>,
}

impl Subscriber {
    /// Start the delivery loop for `consumer` on the current tokio runtime
    pub fn start(
        id: u64,
        topic: &str,
        options: SubscribeOptions,
        consumer: Arc<dyn GroupConsumer>,
        handler: Handler,
    ) -> (Self, JoinHandle<()>) {
        let inner = Arc::new(SubscriptionInner {
            id,
            topic: topic.to_string(),
            options,
            consumer,
            state: AtomicU8::new(CREATED),
            cancel: CancellationToken::new(),
        });

        inner.state.store(RUNNING, Ordering::Release);
        let task = tokio::spawn(delivery_loop(inner.clone(), handler));

        info!(
            subscription = id,
            topic,
            group = %inner.options.group_name,
            "Subscription started"
        );
        (Self { inner }, task)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn options(&self) -> &SubscribeOptions {
        &self.inner.options
    }

    pub fn state(&self) -> SubscriptionState {
        match self.inner.state.load(Ordering::Acquire) {
            CREATED => SubscriptionState::Created,
            CLOSED => SubscriptionState::Closed,
            _ => SubscriptionState::Running,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Stop delivery and close the group consumer.
    ///
    /// Once this returns no new handler call begins. Calling it again is a no-op, and it is
    /// safe to call from inside the handler.
    pub async fn unsubscribe(&self) -> Result<()> {
        if self.inner.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            debug!(subscription = self.inner.id, "Subscription already closed");
            return Ok(());
        }

        self.inner.cancel.cancel();
        let result = self.inner.consumer.close().await;

        info!(
            subscription = self.inner.id,
            topic = %self.inner.topic,
            "Unsubscribed"
        );
        result
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .field("options", &self.inner.options)
            .field("state", &self.state())
            .finish()
    }
}

async fn delivery_loop(inner: Arc<SubscriptionInner>, handler: Handler) {
    let mut delivered: u64 = 0;
    let mut skipped: u64 = 0;

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            next = inner.consumer.recv() => next,
        };

        let record = match next {
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                warn!(subscription = inner.id, error = %e, "Error receiving record");
                continue;
            }
            None => {
                debug!(subscription = inner.id, "Group consumer closed");
                break;
            }
        };

        if inner.cancel.is_cancelled() {
            break;
        }

        let message = match codec::decode(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                skipped += 1;
                debug!(
                    subscription = inner.id,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping undecodable record"
                );
                continue;
            }
        };

        let publication = Publication::new(record.topic, message);

        if !inner.begin_dispatch() {
            break;
        }
        if let Err(e) = handler(&publication) {
            debug!(subscription = inner.id, error = %e, "Handler returned an error");
        }
        delivered += 1;
        if !inner.end_dispatch() {
            break;
        }
    }

    debug!(
        subscription = inner.id,
        delivered,
        skipped,
        "Delivery loop stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::protocol::{ConsumedRecord, Message};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Group consumer fed from a channel
    struct ChannelConsumer {
        records: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConsumedRecord>>,
        cancel: CancellationToken,
    }

    fn channel_consumer() -> (mpsc::UnboundedSender<ConsumedRecord>, Arc<ChannelConsumer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer {
            records: tokio::sync::Mutex::new(rx),
            cancel: CancellationToken::new(),
        });
        (tx, consumer)
    }

    #[async_trait]
    impl GroupConsumer for ChannelConsumer {
        async fn recv(&self) -> Option<Result<ConsumedRecord>> {
            let mut records = self.records.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => None,
                record = records.recv() => record.map(Ok),
            }
        }

        async fn close(&self) -> Result<()> {
            self.cancel.cancel();
            Ok(())
        }
    }

    fn record(offset: i64, payload: Bytes) -> ConsumedRecord {
        ConsumedRecord {
            topic: "orders".to_string(),
            partition: 0,
            offset,
            payload,
        }
    }

    fn encoded(body: &str) -> Bytes {
        codec::encode(&Message::new(body.to_string())).unwrap()
    }

    fn recording_handler() -> (Handler, Arc<Mutex<Vec<Publication>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handler = handler(move |publication: &Publication| {
            sink.lock().push(publication.clone());
            Ok(())
        });
        (handler, received)
    }

    async fn wait_for(received: &Arc<Mutex<Vec<Publication>>>, count: usize) {
        for _ in 0..200 {
            if received.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} publications, got {}", count, received.lock().len());
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let (tx, consumer) = channel_consumer();
        let (handler, received) = recording_handler();
        let (subscriber, _task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, handler);
        assert_eq!(subscriber.state(), SubscriptionState::Running);

        for i in 0..5 {
            tx.send(record(i, encoded(&format!("m{}", i)))).unwrap();
        }
        wait_for(&received, 5).await;

        let bodies: Vec<Bytes> = received
            .lock()
            .iter()
            .map(|p| p.message().body.clone())
            .collect();
        let expected: Vec<Bytes> = (0..5).map(|i| Bytes::from(format!("m{}", i))).collect();
        assert_eq!(bodies, expected);
        assert!(received.lock().iter().all(|p| p.topic() == "orders"));
    }

    #[tokio::test]
    async fn test_skips_undecodable_records() {
        let (tx, consumer) = channel_consumer();
        let (handler, received) = recording_handler();
        let (_subscriber, _task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, handler);

        tx.send(record(0, Bytes::from_static(b"garbage"))).unwrap();
        tx.send(record(1, Bytes::from_static(b"null"))).unwrap();
        tx.send(record(2, encoded("valid"))).unwrap();
        wait_for(&received, 1).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message().body, Bytes::from("valid"));
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_delivery() {
        let (tx, consumer) = channel_consumer();
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let failing = handler(move |_: &Publication| {
            *counter.lock() += 1;
            Err(BrokerError::transport("handler failed"))
        });
        let (subscriber, _task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, failing);

        for i in 0..3 {
            tx.send(record(i, encoded("m"))).unwrap();
        }
        for _ in 0..200 {
            if *calls.lock() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*calls.lock(), 3);
        assert!(!subscriber.is_closed());
    }

    #[tokio::test]
    async fn test_handler_can_offload_blocking_work() {
        let (tx, consumer) = channel_consumer();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let offloading = handler(move |publication: &Publication| {
            let body = publication.message().body.clone();
            let done = done_tx.clone();
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(Duration::from_millis(20));
                let _ = done.send(body);
            });
            Ok(())
        });
        let (_subscriber, _task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, offloading);

        tx.send(record(0, encoded("slow"))).unwrap();
        let body = tokio::time::timeout(Duration::from_secs(1), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, Bytes::from("slow"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (tx, consumer) = channel_consumer();
        let (handler, received) = recording_handler();
        let (subscriber, task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, handler);

        tx.send(record(0, encoded("before"))).unwrap();
        wait_for(&received, 1).await;

        subscriber.unsubscribe().await.unwrap();
        assert_eq!(subscriber.state(), SubscriptionState::Closed);

        let _ = tx.send(record(1, encoded("after")));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("delivery loop did not stop")
            .unwrap();

        assert_eq!(received.lock().len(), 1);

        // Second unsubscribe is a no-op
        subscriber.unsubscribe().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_during_handler() {
        let (tx, consumer) = channel_consumer();
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(std::sync::Barrier::new(2));
        let calls = Arc::new(Mutex::new(0usize));

        let gate = release.clone();
        let counter = calls.clone();
        let slow = handler(move |_: &Publication| {
            *counter.lock() += 1;
            let _ = entered_tx.send(());
            gate.wait();
            Ok(())
        });
        let (subscriber, task) =
            Subscriber::start(1, "orders", SubscribeOptions::default(), consumer, slow);

        tx.send(record(0, encoded("first"))).unwrap();
        tx.send(record(1, encoded("second"))).unwrap();
        entered_rx.recv().await.unwrap();

        // The first call is in flight; closing must not wait for it or allow a second one.
        subscriber.unsubscribe().await.unwrap();
        release.wait();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("delivery loop did not stop")
            .unwrap();
        assert_eq!(*calls.lock(), 1);
    }
}
