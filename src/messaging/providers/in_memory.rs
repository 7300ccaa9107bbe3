//! # In-Memory Broker
//!
//! Thread-safe in-process model of the AMQP behaviour the report queue relies on,
//! for tests and local development.
//!
//! ## Modelled semantics
//!
//! - Direct and fanout exchanges, bindings, and the nameless default exchange
//! - Queue arguments: dead-letter exchange/routing key, `x-max-priority`,
//!   `x-max-length` (drop-head overflow) and `x-message-ttl`
//! - Per-message `expiration`, checked lazily whenever a queue is touched
//! - Priority delivery (higher first, FIFO within a priority band)
//! - Push delivery bounded by per-consumer prefetch
//! - Requeue keeps the original position and sets the redelivered flag
//! - Reject without requeue, expiry and overflow route to the dead-letter exchange
//!
//! Headers such as `x-death` are not modelled.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::constants::amqp::DEFAULT_EXCHANGE;
use crate::error::{QueueError, QueueResult};
use crate::messaging::broker::{
    DeliveryAcker, DeliveryStream, ExchangeKind, MessageBroker, MessageProperties,
    QueueArguments, RawDelivery,
};

/// How the broker answers publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Accept and route every publish
    #[default]
    Accept,
    /// Answer with a publisher-confirm nack; nothing is enqueued
    Refuse,
    /// Fail the publish call outright
    Fail,
}

/// How the broker answers subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumeMode {
    #[default]
    Accept,
    /// Fail the way a provider does once its own reconnect attempts are spent
    Exhausted,
}

/// Record of a publish call the broker answered (accepted or refused)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    routing_key: String,
    body: Vec<u8>,
    properties: MessageProperties,
    enqueued_at: Instant,
    redelivered: bool,
}

impl StoredMessage {
    fn is_expired(&self, queue_ttl_ms: Option<u32>, now: Instant) -> bool {
        let ttl = match (self.properties.expiration_ms(), queue_ttl_ms) {
            (Some(message), Some(queue)) => Some(message.min(u64::from(queue))),
            (Some(message), None) => Some(message),
            (None, Some(queue)) => Some(u64::from(queue)),
            (None, None) => None,
        };
        ttl.map(|ms| now.duration_since(self.enqueued_at) >= Duration::from_millis(ms))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct MemoryQueue {
    arguments: QueueArguments,
    ready: Vec<StoredMessage>,
}

impl MemoryQueue {
    fn effective_priority(&self, message: &StoredMessage) -> u8 {
        match self.arguments.max_priority {
            Some(max) => message.properties.priority.unwrap_or(0).min(max),
            None => 0,
        }
    }

    fn pop_next(&mut self) -> Option<StoredMessage> {
        let index = self
            .ready
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                self.effective_priority(a)
                    .cmp(&self.effective_priority(b))
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.ready.remove(index))
    }

    fn pop_oldest(&mut self) -> Option<StoredMessage> {
        let index = self
            .ready
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| m.seq)
            .map(|(i, _)| i)?;
        Some(self.ready.remove(index))
    }
}

#[derive(Debug)]
struct MemoryConsumer {
    tag: String,
    queue: String,
    prefetch: u16,
    in_flight: usize,
    sender: UnboundedSender<QueueResult<RawDelivery>>,
}

impl MemoryConsumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < usize::from(self.prefetch)
    }
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    consumer_tag: Option<String>,
    message: StoredMessage,
}

#[derive(Debug)]
struct BrokerState {
    handle: Weak<Mutex<BrokerState>>,
    connected: bool,
    publish_mode: PublishMode,
    consume_mode: ConsumeMode,
    consume_calls: usize,
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<(String, String, String)>,
    queues: HashMap<String, MemoryQueue>,
    consumers: Vec<MemoryConsumer>,
    unacked: HashMap<u64, Unacked>,
    published: Vec<PublishedMessage>,
    next_seq: u64,
    next_tag: u64,
}

impl BrokerState {
    fn new(handle: Weak<Mutex<BrokerState>>) -> Self {
        Self {
            handle,
            connected: true,
            publish_mode: PublishMode::Accept,
            consume_mode: ConsumeMode::Accept,
            consume_calls: 0,
            exchanges: HashMap::new(),
            bindings: Vec::new(),
            queues: HashMap::new(),
            consumers: Vec::new(),
            unacked: HashMap::new(),
            published: Vec::new(),
            next_seq: 1,
            next_tag: 1,
        }
    }

    fn ensure_connected(&self) -> QueueResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(QueueError::connection("in-memory broker is disconnected"))
        }
    }

    fn ensure_queue(&self, name: &str) -> QueueResult<()> {
        if self.queues.contains_key(name) {
            Ok(())
        } else {
            Err(QueueError::queue_not_found(name))
        }
    }

    fn route_targets(&self, exchange: &str, routing_key: &str) -> QueueResult<Vec<String>> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let kind = self.exchanges.get(exchange).ok_or_else(|| {
            QueueError::publish(routing_key, format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;

        Ok(self
            .bindings
            .iter()
            .filter(|(_, bound_exchange, key)| {
                bound_exchange == exchange && (*kind == ExchangeKind::Fanout || key == routing_key)
            })
            .map(|(queue, _, _)| queue.clone())
            .collect())
    }

    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> QueueResult<()> {
        let targets = self.route_targets(exchange, routing_key)?;
        if targets.is_empty() {
            debug!(exchange = %exchange, routing_key = %routing_key, "Unroutable message dropped");
        }

        for queue in targets {
            let message = StoredMessage {
                seq: self.take_seq(),
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
                properties: properties.clone(),
                enqueued_at: Instant::now(),
                redelivered: false,
            };
            self.enqueue(&queue, message);
        }
        Ok(())
    }

    fn enqueue(&mut self, queue_name: &str, message: StoredMessage) {
        let overflow = {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            queue.ready.push(message);

            let mut overflow = Vec::new();
            if let Some(max_length) = queue.arguments.max_length {
                while queue.ready.len() > max_length as usize {
                    match queue.pop_oldest() {
                        Some(dropped) => overflow.push(dropped),
                        None => break,
                    }
                }
            }
            overflow
        };

        for dropped in overflow {
            debug!(
                queue = %queue_name,
                "Queue length limit reached; dead-lettering oldest message"
            );
            self.dead_letter(queue_name, dropped);
        }
        self.dispatch(queue_name);
    }

    fn dead_letter(&mut self, queue_name: &str, mut message: StoredMessage) {
        let arguments = match self.queues.get(queue_name) {
            Some(queue) => queue.arguments.clone(),
            None => return,
        };
        let Some(exchange) = arguments.dead_letter_exchange else {
            debug!(queue = %queue_name, "No dead-letter exchange; message discarded");
            return;
        };

        let routing_key = arguments
            .dead_letter_routing_key
            .unwrap_or_else(|| message.routing_key.clone());
        // Dead-lettering strips the per-message TTL.
        message.properties.expiration = None;

        if let Err(e) = self.route(&exchange, &routing_key, &message.body, &message.properties) {
            warn!(queue = %queue_name, error = %e, "Dead-letter routing failed; message discarded");
        }
    }

    fn reap_expired(&mut self, queue_name: &str) {
        let now = Instant::now();
        let expired = {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            let ttl = queue.arguments.message_ttl_ms;
            let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.ready)
                .into_iter()
                .partition(|m| m.is_expired(ttl, now));
            queue.ready = live;
            expired
        };

        for message in expired {
            debug!(queue = %queue_name, "Message expired; dead-lettering");
            self.dead_letter(queue_name, message);
        }
    }

    /// Push ready messages to consumers with free prefetch slots
    fn dispatch(&mut self, queue_name: &str) {
        self.reap_expired(queue_name);

        loop {
            let consumer_index = self
                .consumers
                .iter()
                .enumerate()
                .filter(|(_, c)| c.queue == queue_name && c.has_capacity())
                .min_by_key(|(_, c)| c.in_flight)
                .map(|(i, _)| i);
            let Some(consumer_index) = consumer_index else {
                return;
            };

            let Some(message) = self.queues.get_mut(queue_name).and_then(|q| q.pop_next()) else {
                return;
            };

            let delivery_tag = self.take_tag();
            let delivery = self.raw_delivery(delivery_tag, &message);

            if self.consumers[consumer_index]
                .sender
                .unbounded_send(Ok(delivery))
                .is_err()
            {
                // Receiver dropped: forget the consumer, keep the message.
                self.consumers.remove(consumer_index);
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.ready.push(message);
                }
                continue;
            }

            let consumer = &mut self.consumers[consumer_index];
            consumer.in_flight += 1;
            let consumer_tag = consumer.tag.clone();
            self.unacked.insert(
                delivery_tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer_tag: Some(consumer_tag),
                    message,
                },
            );
        }
    }

    fn raw_delivery(&self, delivery_tag: u64, message: &StoredMessage) -> RawDelivery {
        RawDelivery {
            delivery_tag,
            body: message.body.clone(),
            properties: message.properties.clone(),
            redelivered: message.redelivered,
            acker: DeliveryAcker::InMemory(InMemoryAcker {
                state: self.handle.clone(),
                delivery_tag,
            }),
        }
    }

    fn settle(&mut self, delivery_tag: u64) -> QueueResult<Unacked> {
        self.ensure_connected()?;
        let entry = self.unacked.remove(&delivery_tag).ok_or_else(|| {
            QueueError::acknowledge(delivery_tag, "PRECONDITION_FAILED - unknown delivery tag")
        })?;

        if let Some(tag) = &entry.consumer_tag {
            if let Some(consumer) = self.consumers.iter_mut().find(|c| &c.tag == tag) {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
        }
        Ok(entry)
    }

    fn requeue(&mut self, entry: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = entry;
        message.redelivered = true;
        // Original sequence number keeps the message at its old position.
        if let Some(target) = self.queues.get_mut(&queue) {
            target.ready.push(message);
        }
    }

    /// Drop every subscription and return unacknowledged messages to their queues
    fn drop_channel(&mut self) {
        self.consumers.clear();
        let pending: Vec<Unacked> = self.unacked.drain().map(|(_, entry)| entry).collect();
        let queues: Vec<String> = pending.iter().map(|e| e.queue.clone()).collect();
        for entry in pending {
            self.requeue(entry);
        }
        for queue in queues {
            self.reap_expired(&queue);
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn take_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }
}

/// Acknowledgement handle for an in-memory delivery
#[derive(Debug, Clone)]
pub struct InMemoryAcker {
    state: Weak<Mutex<BrokerState>>,
    delivery_tag: u64,
}

impl InMemoryAcker {
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BrokerState) -> QueueResult<T>) -> QueueResult<T> {
        let state = self.state.upgrade().ok_or_else(|| {
            QueueError::acknowledge(self.delivery_tag, "in-memory broker was dropped")
        })?;
        let mut guard = state.lock();
        f(&mut guard)
    }

    pub fn ack(&self) -> QueueResult<()> {
        self.with_state(|state| {
            let entry = state.settle(self.delivery_tag)?;
            state.dispatch(&entry.queue);
            Ok(())
        })
    }

    pub fn nack(&self, requeue: bool) -> QueueResult<()> {
        self.with_state(|state| {
            let entry = state.settle(self.delivery_tag)?;
            let queue = entry.queue.clone();
            if requeue {
                state.requeue(entry);
            } else {
                state.dead_letter(&queue, entry.message);
            }
            state.dispatch(&queue);
            Ok(())
        })
    }
}

/// In-memory [`MessageBroker`] for tests and local development
///
/// Clones share the same broker state.
///
/// ```rust
/// use report_queue::messaging::{ExchangeKind, MessageBroker, QueueArguments};
/// use report_queue::messaging::providers::InMemoryBroker;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// broker.declare_exchange("reports", ExchangeKind::Direct, true).await.unwrap();
/// broker.declare_queue("render", &QueueArguments::new()).await.unwrap();
/// broker.bind_queue("render", "reports", "render").await.unwrap();
///
/// let accepted = broker
///     .publish("reports", "render", b"{}", &Default::default())
///     .await
///     .unwrap();
/// assert!(accepted);
/// assert_eq!(broker.message_count("render").await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new_cyclic(|handle| Mutex::new(BrokerState::new(handle.clone()))),
        }
    }

    /// Every publish the broker answered, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn set_publish_mode(&self, mode: PublishMode) {
        self.state.lock().publish_mode = mode;
    }

    pub fn set_consume_mode(&self, mode: ConsumeMode) {
        self.state.lock().consume_mode = mode;
    }

    /// Number of `consume` calls made, successful or not
    pub fn consume_calls(&self) -> usize {
        self.state.lock().consume_calls
    }

    /// Simulate a lost connection
    ///
    /// Subscriptions end, unacknowledged messages return to their queues marked
    /// redelivered, and every operation fails until [`Self::reconnect`].
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.drop_channel();
    }

    pub fn reconnect(&self) {
        self.state.lock().connected = true;
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .consumers
            .iter()
            .filter(|c| c.queue == queue)
            .count()
    }

    /// Properties of the ready messages in `queue`, in delivery order
    pub fn ready_properties(&self, queue: &str) -> Vec<MessageProperties> {
        let mut state = self.state.lock();
        state.reap_expired(queue);
        let Some(target) = state.queues.get(queue) else {
            return Vec::new();
        };
        let mut ready: Vec<&StoredMessage> = target.ready.iter().collect();
        ready.sort_by(|a, b| {
            target
                .effective_priority(b)
                .cmp(&target.effective_priority(a))
                .then(a.seq.cmp(&b.seq))
        });
        ready.into_iter().map(|m| m.properties.clone()).collect()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _durable: bool,
    ) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(QueueError::topology(
                name,
                format!(
                    "PRECONDITION_FAILED - exchange declared as {existing:?}, requested {kind:?}"
                ),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                debug!(exchange = %name, kind = ?kind, "Exchange declared");
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        match state.queues.get(name) {
            Some(existing) if existing.arguments != *arguments => Err(QueueError::topology(
                name,
                "PRECONDITION_FAILED - inequivalent queue arguments",
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    MemoryQueue {
                        arguments: arguments.clone(),
                        ready: Vec::new(),
                    },
                );
                debug!(queue = %name, "Queue declared");
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        if !state.queues.contains_key(queue) {
            return Err(QueueError::topology(queue, "NOT_FOUND - no queue to bind"));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(QueueError::topology(
                exchange,
                "NOT_FOUND - no exchange to bind to",
            ));
        }

        let binding = (
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        );
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> QueueResult<bool> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        match state.publish_mode {
            PublishMode::Fail => {
                return Err(QueueError::publish(routing_key, "simulated publish failure"));
            }
            PublishMode::Refuse => {
                state.published.push(PublishedMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                    properties: properties.clone(),
                });
                return Ok(false);
            }
            PublishMode::Accept => {}
        }

        state.route(exchange, routing_key, body, properties)?;
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties: properties.clone(),
        });
        Ok(true)
    }

    async fn get(&self, queue: &str) -> QueueResult<Option<RawDelivery>> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.ensure_queue(queue)?;
        state.reap_expired(queue);

        let Some(message) = state.queues.get_mut(queue).and_then(|q| q.pop_next()) else {
            return Ok(None);
        };

        let delivery_tag = state.take_tag();
        let delivery = state.raw_delivery(delivery_tag, &message);
        state.unacked.insert(
            delivery_tag,
            Unacked {
                queue: queue.to_string(),
                consumer_tag: None,
                message,
            },
        );
        Ok(Some(delivery))
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<DeliveryStream> {
        let mut state = self.state.lock();
        state.consume_calls += 1;
        state.ensure_connected()?;
        if state.consume_mode == ConsumeMode::Exhausted {
            return Err(QueueError::connection_exhausted(
                1,
                "in-memory broker refused the subscription",
            ));
        }
        state.ensure_queue(queue)?;

        if state.consumers.iter().any(|c| c.tag == consumer_tag) {
            return Err(QueueError::consume(
                queue,
                format!("NOT_ALLOWED - reused consumer tag '{consumer_tag}'"),
            ));
        }

        let (sender, receiver) = unbounded();
        state.consumers.push(MemoryConsumer {
            tag: consumer_tag.to_string(),
            queue: queue.to_string(),
            prefetch,
            in_flight: 0,
            sender,
        });
        state.dispatch(queue);

        debug!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            prefetch = prefetch,
            "Consumer subscribed"
        );
        Ok(Box::pin(receiver))
    }

    async fn cancel(&self, consumer_tag: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;

        let before = state.consumers.len();
        state.consumers.retain(|c| c.tag != consumer_tag);
        if state.consumers.len() == before {
            return Err(QueueError::consumer_not_found(consumer_tag));
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> QueueResult<u32> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.ensure_queue(queue)?;
        state.reap_expired(queue);

        let purged = state
            .queues
            .get_mut(queue)
            .map(|q| std::mem::take(&mut q.ready).len())
            .unwrap_or(0);
        Ok(u32::try_from(purged).unwrap_or(u32::MAX))
    }

    async fn message_count(&self, queue: &str) -> QueueResult<u32> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.ensure_queue(queue)?;
        state.reap_expired(queue);

        let count = state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn health_check(&self) -> QueueResult<bool> {
        Ok(self.state.lock().connected)
    }

    async fn close(&self) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.drop_channel();
        state.connected = false;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
