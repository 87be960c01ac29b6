// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Push delivery to live subscribers.
//!
//! Every subscriber is an [`OnlineConsumer`] in a registry keyed by
//! [`SubscriptionId`] and owns one delivery task. The task drains the
//! subscriber's consumer id (dequeue, push, repeat) until it is caught up,
//! then parks until the next enqueue wakes it. Wake-ups coalesce, so a
//! subscriber that is stuck in a push costs one parked task no matter how
//! many messages arrive. When a push fails the cursor advance is reverted
//! and the subscriber evicts itself without waiting for its peers.
//!
//! ```text
//!  enqueue ──► QueueService ──► broadcast: wake every subscriber
//!                                  │
//!                   ┌──────────────┼──────────────┐
//!                   ▼              ▼              ▼
//!              task(c1)       task(c2)       task(c3)   dequeue → push → …
//!                   │
//!                   ▼ push failed
//!              revert, evict(c1)
//! ```
//!
//! Deliveries for the same consumer id are serialised, so several streams
//! sharing an id split its messages between them without duplicates.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::Display;
use parking_lot::Mutex;
use snafu::{OptionExt, Snafu, ensure};
use tokio::{
    sync::{Mutex as AsyncMutex, Notify, mpsc},
    task::{JoinError, JoinHandle},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{DEFAULT_DELIVERY_BUFFER, ServerConfig},
    error::{ClosedSnafu, InvalidConsumerIdSnafu, Result},
    metrics::{CONSUMERS_EVICTED, CONSUMERS_ONLINE, MESSAGES_DELIVERED, SUBSCRIPTIONS_ENDED},
    service::{Message, QueueService},
};

/// Why a push to a subscriber failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    #[snafu(display("Subscriber stream is closed"))]
    Disconnected,

    #[snafu(display("Subscriber transport failed: {message}"))]
    Transport { message: String },
}

/// Outbound stream of one subscriber.
///
/// `push` must be cancel safe: when its future is dropped before completing,
/// the message must not have been delivered.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn push(&self, message: &Message) -> std::result::Result<(), SinkError>;

    /// Resolves once the remote end is gone. Never resolves by default.
    async fn closed(&self) { std::future::pending::<()>().await }
}

#[async_trait]
impl MessageSink for mpsc::Sender<Bytes> {
    async fn push(&self, message: &Message) -> std::result::Result<(), SinkError> {
        self.send(message.payload.clone())
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&self) { mpsc::Sender::closed(self).await }
}

#[async_trait]
impl MessageSink for mpsc::Sender<Message> {
    async fn push(&self, message: &Message) -> std::result::Result<(), SinkError> {
        self.send(message.clone())
            .await
            .map_err(|_| SinkError::Disconnected)
    }

    async fn closed(&self) { mpsc::Sender::closed(self).await }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, derive_more::Debug, Display)]
#[debug("SubscriptionId({_0})")]
#[display("{_0}")]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self { Self(Uuid::new_v4()) }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid { &self.0 }
}

/// How a subscription ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// A push failed; the undelivered message was handed back.
    Evicted,
    /// The caller's cancellation token fired.
    Cancelled,
    /// The sink reported its remote end closed.
    SinkClosed,
    /// The broadcaster is shutting down.
    Shutdown,
}

impl SubscriptionEnd {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Cancelled => "cancelled",
            Self::SinkClosed => "sink_closed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Receiving end of [`Broadcaster::stream`]. A payload counts as delivered
/// once it is in the channel.
pub struct Subscription {
    rx:   mpsc::Receiver<Bytes>,
    task: JoinHandle<Result<SubscriptionEnd>>,
}

impl Subscription {
    /// Next delivered payload; `None` once the subscription has ended and the
    /// channel is drained.
    pub async fn next(&mut self) -> Option<Bytes> { self.rx.recv().await }

    /// Drop the receiver and wait for the subscription task to finish.
    ///
    /// # Panics
    ///
    /// Resumes the panic of a subscription task that panicked.
    pub async fn finish(self) -> Result<SubscriptionEnd> {
        drop(self.rx);
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                resume_if_panicked(e, "subscription task");
                ClosedSnafu.fail()
            }
        }
    }
}

/// Re-raise the panic carried by `e`; a cancelled task is only logged.
fn resume_if_panicked(e: JoinError, task: &str) {
    if e.is_panic() {
        std::panic::resume_unwind(e.into_panic());
    }
    error!(task, error = %e, "task cancelled");
}

/// A live subscriber.
pub struct OnlineConsumer {
    id:          SubscriptionId,
    consumer_id: u32,
    sink:        Box<dyn MessageSink>,
    /// Fired on eviction and when the subscription ends.
    close:       CancellationToken,
    /// Holds at most one pending wake-up for the delivery task.
    wake:        Notify,
}

impl OnlineConsumer {
    pub const fn id(&self) -> SubscriptionId { self.id }

    pub const fn consumer_id(&self) -> u32 { self.consumer_id }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeliveryOutcome {
    /// Caught up after delivering this many messages.
    Drained(usize),
    /// A push failed and was reverted.
    Evicted,
    /// The subscription ended or the broadcaster is shutting down.
    Closed,
    /// Dequeue hit a hard storage error; retried on the next wake-up.
    Stalled,
}

/// Enqueue and subscribe entry points for the RPC layer.
pub struct Broadcaster {
    service:         Arc<QueueService>,
    online:          Mutex<HashMap<SubscriptionId, Arc<OnlineConsumer>>>,
    delivery_locks:  Mutex<HashMap<u32, Arc<AsyncMutex<()>>>>,
    delivery_buffer: usize,
    shutdown:        CancellationToken,
    tasks:           TaskTracker,
}

impl Broadcaster {
    /// Open the queue service described by `config` and wrap it.
    pub fn open(config: &ServerConfig) -> Result<Arc<Self>> {
        let service = Arc::new(QueueService::open(config)?);
        Ok(Arc::new(
            Self::new(service).with_delivery_buffer(config.delivery_buffer),
        ))
    }

    pub fn new(service: Arc<QueueService>) -> Self {
        Self {
            service,
            online: Mutex::new(HashMap::new()),
            delivery_locks: Mutex::new(HashMap::new()),
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Bound of the channel behind [`Broadcaster::stream`].
    #[must_use]
    pub fn with_delivery_buffer(mut self, delivery_buffer: usize) -> Self {
        self.delivery_buffer = delivery_buffer.max(1);
        self
    }

    pub const fn service(&self) -> &Arc<QueueService> { &self.service }

    pub fn online_count(&self) -> usize { self.online.lock().len() }

    /// Append a message and wake every subscriber. Returns the message id
    /// without waiting for delivery.
    pub async fn enqueue(&self, data: &[u8]) -> Result<u64> {
        let element_id = self.service.enqueue(data)?;
        self.broadcast();
        Ok(element_id)
    }

    /// Wake the delivery task of every current subscriber. Returns how many
    /// were woken.
    pub fn broadcast(&self) -> usize {
        let online = self.online.lock();
        for consumer in online.values() {
            consumer.wake.notify_one();
        }
        online.len()
    }

    /// Register a subscriber for `consumer_id` and deliver to it until it is
    /// evicted, its sink closes, `cancel` fires or the broadcaster shuts down.
    ///
    /// # Panics
    ///
    /// Resumes the panic of a delivery task that panicked, e.g. inside the
    /// sink's `push`.
    pub async fn subscribe<S: MessageSink>(
        self: &Arc<Self>,
        consumer_id: u64,
        sink: S,
        cancel: CancellationToken,
    ) -> Result<SubscriptionEnd> {
        let id = u32::try_from(consumer_id)
            .ok()
            .context(InvalidConsumerIdSnafu { consumer_id })?;
        ensure!(
            !self.service.is_closed() && !self.shutdown.is_cancelled(),
            ClosedSnafu
        );

        let consumer = Arc::new(OnlineConsumer {
            id: SubscriptionId::new(),
            consumer_id: id,
            sink: Box::new(sink),
            close: CancellationToken::new(),
            wake: Notify::new(),
        });
        self.online.lock().insert(consumer.id, Arc::clone(&consumer));
        CONSUMERS_ONLINE.inc();
        info!(subscription = %consumer.id, consumer_id = id, "consumer subscribed");

        let mut delivery = self
            .tasks
            .spawn(Arc::clone(self).run_delivery(Arc::clone(&consumer)));

        let (end, joined) = tokio::select! {
            biased;
            () = consumer.close.cancelled() => (SubscriptionEnd::Evicted, None),
            () = cancel.cancelled() => (SubscriptionEnd::Cancelled, None),
            () = self.shutdown.cancelled() => (SubscriptionEnd::Shutdown, None),
            () = consumer.sink.closed() => (SubscriptionEnd::SinkClosed, None),
            joined = &mut delivery => (SubscriptionEnd::Evicted, Some(joined)),
        };

        // Interrupts an in-flight push, which hands its message back.
        consumer.close.cancel();
        let joined = match joined {
            Some(joined) => joined,
            None => delivery.await,
        };
        if self.online.lock().remove(&consumer.id).is_some() {
            CONSUMERS_ONLINE.dec();
        }
        if let Err(e) = joined {
            resume_if_panicked(e, "delivery task");
        }

        SUBSCRIPTIONS_ENDED.with_label_values(&[end.as_str()]).inc();
        info!(
            subscription = %consumer.id,
            consumer_id = id,
            reason = end.as_str(),
            "subscription ended"
        );
        Ok(end)
    }

    /// Subscribe `consumer_id` through a bounded channel and hand back the
    /// receiving end. The subscription runs on its own task.
    pub fn stream(
        self: &Arc<Self>,
        consumer_id: u64,
        cancel: CancellationToken,
    ) -> Result<Subscription> {
        u32::try_from(consumer_id)
            .ok()
            .context(InvalidConsumerIdSnafu { consumer_id })?;
        ensure!(!self.service.is_closed(), ClosedSnafu);

        let (tx, rx) = mpsc::channel::<Bytes>(self.delivery_buffer);
        let this = Arc::clone(self);
        let task = self
            .tasks
            .spawn(async move { this.subscribe(consumer_id, tx, cancel).await });
        Ok(Subscription { rx, task })
    }

    /// End every subscription, wait until in-flight pushes have handed their
    /// messages back, then close the service so the final cursor snapshot
    /// sees the reverts.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.service.close()
    }

    async fn run_delivery(self: Arc<Self>, consumer: Arc<OnlineConsumer>) {
        loop {
            match self.deliver(&consumer).await {
                DeliveryOutcome::Evicted => {
                    self.evict(&consumer);
                    return;
                }
                DeliveryOutcome::Closed => return,
                DeliveryOutcome::Drained(_) | DeliveryOutcome::Stalled => {}
            }

            tokio::select! {
                biased;
                () = consumer.close.cancelled() => return,
                () = self.shutdown.cancelled() => return,
                () = consumer.wake.notified() => {}
            }
        }
    }

    async fn deliver(&self, consumer: &OnlineConsumer) -> DeliveryOutcome {
        let lock = self.delivery_lock(consumer.consumer_id);
        let _guard = tokio::select! {
            biased;
            () = consumer.close.cancelled() => return DeliveryOutcome::Closed,
            () = self.shutdown.cancelled() => return DeliveryOutcome::Closed,
            guard = lock.lock() => guard,
        };

        let mut delivered = 0;
        loop {
            if consumer.close.is_cancelled() || self.shutdown.is_cancelled() {
                return DeliveryOutcome::Closed;
            }

            let message = match self.service.dequeue(consumer.consumer_id) {
                Ok(message) => message,
                Err(e) if e.is_caught_up() => {
                    if delivered > 0 {
                        debug!(consumer_id = consumer.consumer_id, delivered, "consumer caught up");
                    }
                    return DeliveryOutcome::Drained(delivered);
                }
                Err(e) => {
                    error!(consumer_id = consumer.consumer_id, error = %e, "dequeue failed");
                    return DeliveryOutcome::Stalled;
                }
            };

            let pushed = tokio::select! {
                biased;
                () = consumer.close.cancelled() => None,
                () = self.shutdown.cancelled() => None,
                result = consumer.sink.push(&message) => Some(result),
            };
            match pushed {
                Some(Ok(())) => {
                    delivered += 1;
                    MESSAGES_DELIVERED.inc();
                }
                Some(Err(e)) => {
                    warn!(
                        subscription = %consumer.id,
                        consumer_id = consumer.consumer_id,
                        element_id = message.element_id,
                        error = %e,
                        "delivery failed, reverting cursor"
                    );
                    self.revert(consumer);
                    return DeliveryOutcome::Evicted;
                }
                None => {
                    debug!(
                        subscription = %consumer.id,
                        element_id = message.element_id,
                        "push interrupted, reverting cursor"
                    );
                    self.revert(consumer);
                    return DeliveryOutcome::Closed;
                }
            }
        }
    }

    fn revert(&self, consumer: &OnlineConsumer) {
        if let Err(e) = self.service.revert_dequeue(consumer.consumer_id) {
            error!(consumer_id = consumer.consumer_id, error = %e, "cursor revert failed");
        }
    }

    fn evict(&self, consumer: &OnlineConsumer) {
        if self.online.lock().remove(&consumer.id).is_some() {
            CONSUMERS_ONLINE.dec();
            CONSUMERS_EVICTED.inc();
            info!(subscription = %consumer.id, consumer_id = consumer.consumer_id, "consumer evicted");
        }
        consumer.close.cancel();
    }

    fn delivery_lock(&self, consumer_id: u32) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.delivery_locks.lock().entry(consumer_id).or_default())
    }
}
